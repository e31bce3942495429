use crate::{BaseVelocity, JointState, THETA_VEL, X_VEL, Y_VEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What `get_action` hands the host: clamped base velocities plus integrated joint targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeleopAction {
    pub base: BaseVelocity,
    pub joints: JointState,
}

impl TeleopAction {
    /// Flat `x.vel`, `y.vel`, `theta.vel`, `<joint>.pos` view
    pub fn to_named_values(&self) -> BTreeMap<String, f64> {
        let mut values = self.joints.to_named_positions();
        values.insert(X_VEL.to_string(), self.base.x);
        values.insert(Y_VEL.to_string(), self.base.y);
        values.insert(THETA_VEL.to_string(), self.base.theta);
        values
    }

    /// True when any base velocity exceeds `threshold` in magnitude
    pub fn is_moving(&self, threshold: f64) -> bool {
        [self.base.x, self.base.y, self.base.theta]
            .iter()
            .any(|v| v.abs() > threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Velocity,
    Position,
    Image,
    State,
}

/// Capability descriptor: one named field a caller should expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
