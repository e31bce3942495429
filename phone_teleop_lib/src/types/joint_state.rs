use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position range a joint target is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    pub min: f64,
    pub max: f64,
}

impl JointLimit {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Default range for arm joints
    pub fn symmetric() -> Self {
        Self::new(-100.0, 100.0)
    }

    /// Default range for the gripper (never negative)
    pub fn gripper() -> Self {
        Self::new(0.0, 100.0)
    }

    /// Never panics: an inverted range pins to `max`, NaN pins to `min`
    pub fn clamp(&self, position: f64) -> f64 {
        position.max(self.min).min(self.max)
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.min && position <= self.max
    }
}

/// One row of the joint table: name, home pose and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub name: String,
    #[serde(default)]
    pub home: f64,
    pub min: f64,
    pub max: f64,
}

impl JointSpec {
    pub fn new(name: &str, home: f64, limit: JointLimit) -> Self {
        Self {
            name: name.to_string(),
            home,
            min: limit.min,
            max: limit.max,
        }
    }

    pub fn limit(&self) -> JointLimit {
        JointLimit::new(self.min, self.max)
    }

    /// LeKiwi 6DOF arm with the placeholder [-100, 100] / [0, 100] ranges
    pub fn lekiwi_arm() -> Vec<JointSpec> {
        vec![
            JointSpec::new("shoulder_pan", 0.0, JointLimit::symmetric()),
            JointSpec::new("shoulder_lift", 0.0, JointLimit::symmetric()),
            JointSpec::new("elbow_flex", 0.0, JointLimit::symmetric()),
            JointSpec::new("wrist_flex", 0.0, JointLimit::symmetric()),
            JointSpec::new("wrist_roll", 0.0, JointLimit::symmetric()),
            JointSpec::new("gripper", 0.0, JointLimit::gripper()),
        ]
    }
}

/// Absolute joint targets, index-aligned with the joint table they were built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub names: Vec<String>,
    pub positions: Vec<f64>,
    pub timestamp: u64,
}

impl JointState {
    /// Seed every joint at its home pose
    pub fn home(joints: &[JointSpec]) -> Self {
        Self {
            names: joints.iter().map(|j| j.name.clone()).collect(),
            positions: joints.iter().map(|j| j.limit().clamp(j.home)).collect(),
            timestamp: now_millis(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn position(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|i| self.positions[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.positions.iter().copied())
    }

    /// `<joint>.pos` keyed view, the naming the robot side expects
    pub fn to_named_positions(&self) -> BTreeMap<String, f64> {
        self.iter()
            .map(|(name, pos)| (format!("{}.pos", name), pos))
            .collect()
    }

    pub fn update_timestamp(&mut self) {
        self.timestamp = now_millis();
    }
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
