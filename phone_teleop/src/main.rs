use eyre::Result;
use phone_teleop_lib::{
    init_tracing, NdArray, PhoneTeleop, PhoneTeleopConfig, TelemetryPayload, TelemetryValue,
    TeleopError, STATE_FEEDBACK_KEY,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LOOP_PERIOD: Duration = Duration::from_millis(20); // 50 Hz
const FEEDBACK_EVERY: u64 = 5; // 10 Hz camera feedback
const MOTION_THRESHOLD: f64 = 0.01;
const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 240;

fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    info!(
        "Phone teleop starting ({:?} role, phone {}, listen {})",
        config.role,
        config.phone_url(),
        config.listen_addr()
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    let cameras = config.cameras.clone();
    let mut teleop = PhoneTeleop::new(config)?;
    teleop.connect()?;

    info!("Phone teleoperation started, use the phone app to control. Press Ctrl+C to stop.");

    let mut tick: u64 = 0;
    while running.load(Ordering::SeqCst) {
        tick += 1;

        match teleop.get_action() {
            Ok(action) => {
                if tick % FEEDBACK_EVERY == 0 {
                    let mut payload = TelemetryPayload::new();
                    for (idx, camera) in cameras.iter().enumerate() {
                        payload.insert(camera.clone(), TelemetryValue::Array(test_frame(tick, idx)));
                    }
                    payload.insert(
                        STATE_FEEDBACK_KEY.to_string(),
                        TelemetryValue::Array(NdArray::vector(action.joints.positions.clone())),
                    );
                    teleop.send_feedback(payload);
                }

                if action.is_moving(MOTION_THRESHOLD) {
                    info!(
                        "Phone: x={:.2} y={:.2} theta={:.2}",
                        action.base.x, action.base.y, action.base.theta
                    );
                }
            }
            Err(TeleopError::NotConnected) => {
                debug!("Waiting for phone ({})", teleop.state());
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
            Err(e) => {
                error!("Error: {}", e);
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        }

        std::thread::sleep(LOOP_PERIOD);
    }

    info!("Shutting down phone teleop");
    if let Err(e) = teleop.disconnect() {
        warn!("Disconnect failed: {}", e);
    }

    Ok(())
}

/// Config file from PHONE_TELEOP_CONFIG (defaults when unset), then the phone
/// address from the first argument or PHONE_IP.
fn load_config() -> Result<PhoneTeleopConfig> {
    let mut config = match std::env::var("PHONE_TELEOP_CONFIG") {
        Ok(path) => {
            info!("Loading phone teleop config from: {}", path);
            PhoneTeleopConfig::load_from_file(&path)?
        }
        Err(_) => PhoneTeleopConfig::default(),
    };

    if let Some(ip) = std::env::args().nth(1).or_else(|| std::env::var("PHONE_IP").ok()) {
        config.phone_ip = ip;
    }

    config.validate()?;
    Ok(config)
}

/// Moving gradient so the phone can tell frames apart
fn test_frame(tick: u64, camera: usize) -> NdArray {
    let shift = (tick as usize * 4 + camera * 90) % 256;
    let mut pixels = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT * 3) as usize);
    for y in 0..FRAME_HEIGHT as usize {
        for x in 0..FRAME_WIDTH as usize {
            pixels.push(((x + shift) % 256) as u8);
            pixels.push(((y + shift) % 256) as u8);
            pixels.push((shift % 256) as u8);
        }
    }
    NdArray::from_rgb8(FRAME_WIDTH, FRAME_HEIGHT, &pixels)
}
