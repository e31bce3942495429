//! JSON wire protocol between the bridge and the phone.
//!
//! Inbound frames are single JSON objects tagged by `type`; outbound frames
//! are `observation` messages whose entries carry their own `type` tag so the
//! phone can dispatch on it without any schema negotiation.

use crate::{
    element_count, ActionCommand, CommandKind, CommandMessage, DecodeError, ImuReading,
    JoystickInput, NdArray, TelemetryPayload, TelemetryValue, THETA_VEL, VEL_SUFFIX, X_VEL, Y_VEL,
};
use base64::{engine::general_purpose, Engine as _};
use eyre::{eyre, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// `type` of every outbound telemetry frame
pub const OBSERVATION_TYPE: &str = "observation";

/// Decode one inbound text frame.
pub fn decode_command(text: &str) -> Result<CommandMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::ParseFailure(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(DecodeError::ParseFailure(
            "command frame is not a JSON object".to_string(),
        ));
    };

    let tag = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::UnknownType(None))?;
    let kind = CommandKind::from_tag(tag).ok_or_else(|| DecodeError::UnknownType(Some(tag.to_string())))?;

    match kind {
        CommandKind::Action => decode_action(&fields).map(CommandMessage::Action),
        CommandKind::Joystick => from_fields::<JoystickInput>(fields).map(CommandMessage::Joystick),
        CommandKind::Imu => from_fields::<ImuReading>(fields).map(CommandMessage::Imu),
        CommandKind::EmergencyStop => Ok(CommandMessage::EmergencyStop),
    }
}

fn from_fields<T: serde::de::DeserializeOwned>(fields: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| DecodeError::ParseFailure(e.to_string()))
}

fn decode_action(fields: &Map<String, Value>) -> Result<ActionCommand, DecodeError> {
    let mut action = ActionCommand::default();

    for (key, value) in fields {
        let Some(joint) = key.strip_suffix(VEL_SUFFIX) else {
            continue;
        };
        let velocity = value.as_f64().ok_or_else(|| {
            DecodeError::ParseFailure(format!("field '{}' is not a number: {}", key, value))
        })?;

        match key.as_str() {
            X_VEL => action.base.x = velocity,
            Y_VEL => action.base.y = velocity,
            THETA_VEL => action.base.theta = velocity,
            _ => {
                action.joints.insert(joint.to_string(), velocity);
            }
        }
    }

    Ok(action)
}

/// One tagged entry of an observation frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaggedValue {
    Image(String),
    State(Vec<f64>),
    Array(Value),
    Scalar(f64),
    String(String),
}

#[derive(Serialize)]
struct ObservationFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: f64,
    data: BTreeMap<&'a str, TaggedValue>,
}

/// Encodes feedback payloads into observation frames.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryEncoder {
    quality: u8,
}

impl TelemetryEncoder {
    /// `quality` is the JPEG quality used for image entries
    pub fn new(quality: u8) -> Self {
        Self {
            // JPEG quality 0 is not a valid setting for the encoder
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode with the current wall-clock capture time
    pub fn encode(&self, payload: &TelemetryPayload) -> Result<String> {
        let timestamp = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        self.encode_at(payload, timestamp)
    }

    pub fn encode_at(&self, payload: &TelemetryPayload, timestamp: f64) -> Result<String> {
        let frame = ObservationFrame {
            kind: OBSERVATION_TYPE,
            timestamp,
            data: payload
                .iter()
                .map(|(key, value)| (key.as_str(), self.encode_value(key, value)))
                .collect(),
        };
        Ok(serde_json::to_string(&frame)?)
    }

    pub fn encode_value(&self, key: &str, value: &TelemetryValue) -> TaggedValue {
        match value {
            TelemetryValue::Array(array) if array.ndim() == 3 => match self.encode_jpeg(array) {
                Ok(image) => TaggedValue::Image(image),
                Err(e) => {
                    debug!("Sending '{}' as array, JPEG encoding failed: {}", key, e);
                    TaggedValue::Array(nested_array(array))
                }
            },
            TelemetryValue::Array(array) if array.ndim() == 1 => TaggedValue::State(array.data.clone()),
            TelemetryValue::Array(array) => TaggedValue::Array(nested_array(array)),
            TelemetryValue::Scalar(value) => TaggedValue::Scalar(*value),
            TelemetryValue::Text(text) if value.is_data_image() => TaggedValue::Image(text.clone()),
            TelemetryValue::Text(text) => TaggedValue::String(text.clone()),
        }
    }

    /// Compress a `[height, width, channels]` buffer to base64 JPEG
    pub fn encode_jpeg(&self, array: &NdArray) -> Result<String> {
        let [height, width, channels] = array.shape[..] else {
            return Err(eyre!("expected [height, width, channels], got {:?}", array.shape));
        };
        if !array.is_consistent() {
            return Err(eyre!(
                "shape {:?} does not match {} values",
                array.shape,
                array.data.len()
            ));
        }
        if width == 0 || height == 0 {
            return Err(eyre!("empty image {}x{}", width, height));
        }

        let pixels = array.data.iter().map(|&v| to_pixel(v));
        let (bytes, color_type): (Vec<u8>, _) = match channels {
            1 => (pixels.collect(), ExtendedColorType::L8),
            3 => (pixels.collect(), ExtendedColorType::Rgb8),
            // JPEG has no alpha channel
            4 => (
                pixels
                    .enumerate()
                    .filter(|(i, _)| i % 4 != 3)
                    .map(|(_, p)| p)
                    .collect(),
                ExtendedColorType::Rgb8,
            ),
            other => return Err(eyre!("unsupported channel count {}", other)),
        };

        let width = u32::try_from(width)?;
        let height = u32::try_from(height)?;

        let mut jpeg_data = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_data, self.quality);
        encoder
            .encode(&bytes, width, height, color_type)
            .map_err(|e| eyre!("JPEG encoding failed: {}", e))?;

        Ok(general_purpose::STANDARD.encode(&jpeg_data))
    }
}

fn to_pixel(value: f64) -> u8 {
    // NaN casts to 0
    value.round().clamp(0.0, 255.0) as u8
}

/// Nested JSON lists following the array shape
fn nested_array(array: &NdArray) -> Value {
    if !array.is_consistent() {
        return Value::from(array.data.clone());
    }
    nest(&array.shape, &array.data)
}

fn nest(shape: &[usize], data: &[f64]) -> Value {
    match shape.split_first() {
        None => data.first().map_or(Value::Null, |&v| Value::from(v)),
        Some((&0, _)) => Value::Array(Vec::new()),
        Some((&len, rest)) => {
            let Some(stride) = element_count(rest) else {
                return Value::Null;
            };
            Value::Array(
                (0..len)
                    .map(|i| nest(rest, &data[i * stride..(i + 1) * stride]))
                    .collect(),
            )
        }
    }
}
