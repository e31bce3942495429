use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const X_VEL: &str = "x.vel";
pub const Y_VEL: &str = "y.vel";
pub const THETA_VEL: &str = "theta.vel";

/// Suffix carried by every velocity field on the wire
pub const VEL_SUFFIX: &str = ".vel";

/// Base (mobile platform) velocity command
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseVelocity {
    pub x: f64,     // Forward/backward (m/s)
    pub y: f64,     // Left/right (m/s)
    pub theta: f64, // Rotation about z (rad/s)
}

impl BaseVelocity {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn clamped(&self, limits: &VelocityLimits) -> Self {
        let linear = limits.max_linear.abs();
        let angular = limits.max_angular.abs();
        Self {
            x: clamp_finite(self.x, linear),
            y: clamp_finite(self.y, linear),
            theta: clamp_finite(self.theta, angular),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.theta == 0.0
    }
}

// NaN from a misbehaving sender becomes a stop, not a propagated NaN
fn clamp_finite(value: f64, limit: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-limit, limit)
    }
}

/// Linear/angular limits applied to base velocities before they reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityLimits {
    pub max_linear: f64,  // m/s for x.vel and y.vel
    pub max_angular: f64, // rad/s for theta.vel
}

/// Rich `action` command: base velocities plus per-joint velocities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub base: BaseVelocity,
    pub joints: BTreeMap<String, f64>,
}

impl ActionCommand {
    /// Velocity for a joint, 0.0 when the sender did not drive it
    pub fn joint_velocity(&self, joint: &str) -> f64 {
        self.joints.get(joint).copied().unwrap_or(0.0)
    }
}

/// Legacy virtual joystick, both axes in [-1, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoystickInput {
    pub x: f64,
    pub y: f64,
}

/// Legacy phone attitude reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuReading {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub use_imu: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Action,
    Joystick,
    Imu,
    EmergencyStop,
}

impl CommandKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "action" => Some(Self::Action),
            "joystick" => Some(Self::Joystick),
            "imu" => Some(Self::Imu),
            "emergency_stop" => Some(Self::EmergencyStop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Joystick => "joystick",
            Self::Imu => "imu",
            Self::EmergencyStop => "emergency_stop",
        }
    }
}

/// One decoded inbound control frame. Replaced wholesale by the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandMessage {
    Action(ActionCommand),
    Joystick(JoystickInput),
    Imu(ImuReading),
    EmergencyStop,
}

impl CommandMessage {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Action(_) => CommandKind::Action,
            Self::Joystick(_) => CommandKind::Joystick,
            Self::Imu(_) => CommandKind::Imu,
            Self::EmergencyStop => CommandKind::EmergencyStop,
        }
    }

    /// Whether this message should become the current command.
    /// An IMU reading with `use_imu` off only reports attitude.
    pub fn drives_motion(&self) -> bool {
        match self {
            Self::Imu(imu) => imu.use_imu,
            _ => true,
        }
    }

    /// Base velocities surfaced to the host, already clamped to `limits`
    pub fn base_velocity(&self, limits: &VelocityLimits) -> BaseVelocity {
        let raw = match self {
            Self::Action(action) => action.base,
            Self::Joystick(stick) => {
                let x = stick.x.clamp(-1.0, 1.0);
                let y = stick.y.clamp(-1.0, 1.0);
                // Stick up drives forward, stick right strafes right (negative y)
                BaseVelocity::new(y * limits.max_linear, -x * limits.max_linear, 0.0)
            }
            Self::Imu(imu) if imu.use_imu => BaseVelocity::new(
                -imu.pitch * limits.max_linear,
                0.0,
                -imu.roll * limits.max_angular,
            ),
            Self::Imu(_) | Self::EmergencyStop => BaseVelocity::zero(),
        };
        raw.clamped(limits)
    }

    /// Per-joint velocities; legacy kinds never move the arm
    pub fn joint_velocities(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Self::Action(action) => Some(&action.joints),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> VelocityLimits {
        VelocityLimits {
            max_linear: 0.3,
            max_angular: 0.5,
        }
    }

    #[test]
    fn test_action_base_velocity_is_clamped() {
        let cmd = CommandMessage::Action(ActionCommand {
            base: BaseVelocity::new(0.9, -0.9, 2.0),
            joints: BTreeMap::new(),
        });

        assert_eq!(cmd.base_velocity(&limits()), BaseVelocity::new(0.3, -0.3, 0.5));
    }

    #[test]
    fn test_joystick_maps_axes() {
        let cmd = CommandMessage::Joystick(JoystickInput { x: 1.0, y: 0.0 });
        let base = cmd.base_velocity(&limits());

        assert_eq!(base.x, 0.0);
        assert!((base.y + 0.3).abs() < 1e-12);
        assert_eq!(base.theta, 0.0);

        let cmd = CommandMessage::Joystick(JoystickInput { x: 0.0, y: 3.0 });
        assert!((cmd.base_velocity(&limits()).x - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_imu_only_drives_when_enabled() {
        let passive = CommandMessage::Imu(ImuReading {
            pitch: 0.5,
            roll: 0.5,
            yaw: 0.0,
            use_imu: false,
        });
        assert!(!passive.drives_motion());
        assert!(passive.base_velocity(&limits()).is_zero());

        let active = CommandMessage::Imu(ImuReading {
            pitch: 0.5,
            roll: -0.4,
            yaw: 0.0,
            use_imu: true,
        });
        let base = active.base_velocity(&limits());
        assert!(active.drives_motion());
        assert!((base.x + 0.15).abs() < 1e-12);
        assert!((base.theta - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_emergency_stop_is_zero() {
        let cmd = CommandMessage::EmergencyStop;
        assert!(cmd.base_velocity(&limits()).is_zero());
        assert!(cmd.joint_velocities().is_none());
    }

    #[test]
    fn test_nan_velocity_becomes_stop() {
        let base = BaseVelocity::new(f64::NAN, 0.1, f64::INFINITY).clamped(&limits());
        assert_eq!(base, BaseVelocity::new(0.0, 0.1, 0.5));
    }
}
