use crate::{JointSpec, VelocityLimits};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

/// Which side of the socket the bridge sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    /// The phone runs the server; the bridge dials `phone_ip:phone_port`
    Client,
    /// The bridge listens on `listen_host:listen_port` for one phone
    Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneTeleopConfig {
    pub role: ConnectionRole,

    // Phone connection settings (phone acts as server)
    pub phone_ip: String,
    pub phone_port: u16,

    // Used when the bridge is the server
    pub listen_host: String,
    pub listen_port: u16,

    pub connection_timeout_s: f64,
    pub reconnect_interval_s: f64,
    pub disconnect_timeout_s: f64,

    /// JPEG quality 0-100 for camera feedback
    pub video_quality: u8,

    pub max_linear_velocity: f64,  // m/s limit for x.vel and y.vel
    pub max_angular_velocity: f64, // rad/s limit for theta.vel

    pub command_queue_capacity: usize,
    pub feedback_queue_capacity: usize,

    // Velocity integration
    pub deadband: f64,
    pub position_scale: f64,

    pub cameras: Vec<String>,
    pub joints: Vec<JointSpec>,
}

impl Default for PhoneTeleopConfig {
    fn default() -> Self {
        Self {
            role: ConnectionRole::Client,
            phone_ip: "192.168.1.102".to_string(),
            phone_port: 8080,
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8080,
            connection_timeout_s: 10.0,
            reconnect_interval_s: 2.0,
            disconnect_timeout_s: 2.0,
            video_quality: 80,
            max_linear_velocity: 0.3,
            max_angular_velocity: 0.5,
            command_queue_capacity: 10,
            feedback_queue_capacity: 4,
            deadband: 0.01,
            position_scale: 60.0,
            cameras: vec!["front".to_string(), "wrist".to_string()],
            joints: JointSpec::lekiwi_arm(),
        }
    }
}

impl PhoneTeleopConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PhoneTeleopConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_quality > 100 {
            return Err(eyre::eyre!(
                "video_quality must be within 0-100, got {}",
                self.video_quality
            ));
        }

        for (name, value) in [
            ("connection_timeout_s", self.connection_timeout_s),
            ("reconnect_interval_s", self.reconnect_interval_s),
            ("disconnect_timeout_s", self.disconnect_timeout_s),
            ("max_linear_velocity", self.max_linear_velocity),
            ("max_angular_velocity", self.max_angular_velocity),
            ("position_scale", self.position_scale),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(eyre::eyre!("{} must be positive, got {}", name, value));
            }
        }

        if !(self.deadband.is_finite() && self.deadband >= 0.0) {
            return Err(eyre::eyre!("deadband must not be negative, got {}", self.deadband));
        }

        if self.command_queue_capacity == 0 || self.feedback_queue_capacity == 0 {
            return Err(eyre::eyre!("queue capacities must be at least 1"));
        }

        let mut seen = HashSet::new();
        for joint in &self.joints {
            if joint.name.is_empty() {
                return Err(eyre::eyre!("joint names must not be empty"));
            }
            if !seen.insert(joint.name.as_str()) {
                return Err(eyre::eyre!("duplicate joint '{}'", joint.name));
            }
            if joint.min > joint.max {
                return Err(eyre::eyre!(
                    "joint '{}' has min {} above max {}",
                    joint.name,
                    joint.min,
                    joint.max
                ));
            }
            if !joint.limit().contains(joint.home) {
                return Err(eyre::eyre!(
                    "joint '{}' home {} outside limits [{}, {}]",
                    joint.name,
                    joint.home,
                    joint.min,
                    joint.max
                ));
            }
        }

        Ok(())
    }

    /// `ws://` URL dialled in client role
    pub fn phone_url(&self) -> String {
        format!("ws://{}:{}", self.phone_ip, self.phone_port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn connection_timeout(&self) -> Duration {
        seconds(self.connection_timeout_s)
    }

    pub fn reconnect_interval(&self) -> Duration {
        seconds(self.reconnect_interval_s)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        seconds(self.disconnect_timeout_s)
    }

    pub fn velocity_limits(&self) -> VelocityLimits {
        VelocityLimits {
            max_linear: self.max_linear_velocity,
            max_angular: self.max_angular_velocity,
        }
    }
}

/// Seconds from config; values `validate()` would reject become zero
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
