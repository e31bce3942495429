//! Turns streamed joint velocities into absolute joint targets.

use crate::{JointLimit, JointSpec, JointState};
use std::collections::BTreeMap;
use std::time::Instant;

/// Deadband and gain applied to every joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorParams {
    /// Velocities at or below this magnitude are noise, not motion
    pub deadband: f64,
    /// Position units per (velocity unit * second)
    pub scale: f64,
}

impl Default for IntegratorParams {
    fn default() -> Self {
        Self {
            deadband: 0.01,
            scale: 60.0,
        }
    }
}

/// Per-joint accumulator: `position += velocity * dt * scale`, clamped to limits.
///
/// Below the deadband a joint simply holds, there is no decay toward zero.
#[derive(Debug, Clone)]
pub struct VelocityIntegrator {
    limits: Vec<JointLimit>,
    state: JointState,
    params: IntegratorParams,
    last_update: Instant,
}

impl VelocityIntegrator {
    pub fn new(joints: &[JointSpec], params: IntegratorParams) -> Self {
        Self {
            limits: joints.iter().map(JointSpec::limit).collect(),
            state: JointState::home(joints),
            params,
            last_update: Instant::now(),
        }
    }

    pub fn state(&self) -> &JointState {
        &self.state
    }

    pub fn params(&self) -> IntegratorParams {
        self.params
    }

    /// Integrate one velocity sample over `dt` seconds.
    ///
    /// Joints missing from `velocities` are left untouched, as are names the
    /// joint table does not know. A zero, negative or non-finite `dt` is a no-op.
    pub fn integrate(&mut self, velocities: &BTreeMap<String, f64>, dt: f64) -> &JointState {
        if !(dt.is_finite() && dt > 0.0) {
            return &self.state;
        }

        for (joint, &velocity) in velocities {
            if !velocity.is_finite() || velocity.abs() <= self.params.deadband {
                continue;
            }
            let Some(index) = self.state.index_of(joint) else {
                continue;
            };

            let target = self.state.positions[index] + velocity * dt * self.params.scale;
            self.state.positions[index] = self.limits[index].clamp(target);
        }

        self.state.update_timestamp();
        &self.state
    }

    /// Integrate with `dt` measured from the previous call (or construction).
    pub fn advance(&mut self, velocities: Option<&BTreeMap<String, f64>>, now: Instant) -> &JointState {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        match velocities {
            Some(velocities) => self.integrate(velocities, dt),
            None => &self.state,
        }
    }

    /// Drop the elapsed-time baseline, e.g. when a new peer takes over
    pub fn restart_clock(&mut self, now: Instant) {
        self.last_update = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn velocities(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    fn integrator() -> VelocityIntegrator {
        VelocityIntegrator::new(&JointSpec::lekiwi_arm(), IntegratorParams::default())
    }

    #[test]
    fn test_half_second_at_scale_60() {
        let mut integ = integrator();
        let state = integ.integrate(&velocities(&[("shoulder_pan", 1.0)]), 0.5);

        assert!((state.position("shoulder_pan").unwrap() - 30.0).abs() < 1e-9);
        assert_eq!(state.position("elbow_flex"), Some(0.0));
    }

    #[test]
    fn test_clamps_to_joint_limits() {
        let mut integ = integrator();
        integ.integrate(&velocities(&[("shoulder_pan", 1.0), ("gripper", -1.0)]), 5.0);

        assert_eq!(integ.state().position("shoulder_pan"), Some(100.0));
        assert_eq!(integ.state().position("gripper"), Some(0.0));
    }

    #[test]
    fn test_deadband_holds_position() {
        let mut integ = integrator();
        integ.integrate(&velocities(&[("wrist_flex", 0.5)]), 0.1);
        let before = integ.state().position("wrist_flex").unwrap();

        integ.integrate(&velocities(&[("wrist_flex", 0.01), ("elbow_flex", -0.005)]), 10.0);

        assert_eq!(integ.state().position("wrist_flex"), Some(before));
        assert_eq!(integ.state().position("elbow_flex"), Some(0.0));
    }

    #[test]
    fn test_zero_dt_is_noop() {
        let mut integ = integrator();
        integ.integrate(&velocities(&[("shoulder_lift", 50.0)]), 0.0);
        integ.integrate(&velocities(&[("shoulder_lift", 50.0)]), -1.0);
        integ.integrate(&velocities(&[("shoulder_lift", 50.0)]), f64::NAN);

        assert_eq!(integ.state().position("shoulder_lift"), Some(0.0));
    }

    #[test]
    fn test_unknown_joints_are_ignored() {
        let mut integ = integrator();
        let before = integ.state().positions.clone();
        integ.integrate(&velocities(&[("tail", 1.0)]), 1.0);

        assert_eq!(integ.state().positions, before);
    }

    #[test]
    fn test_advance_uses_elapsed_time() {
        let mut integ = integrator();
        let start = Instant::now();
        integ.restart_clock(start);

        let cmd = velocities(&[("elbow_flex", 1.0)]);
        integ.advance(Some(&cmd), start + Duration::from_millis(250));
        assert!((integ.state().position("elbow_flex").unwrap() - 15.0).abs() < 1e-9);

        // No command: clock moves, positions hold
        integ.advance(None, start + Duration::from_secs(2));
        integ.advance(Some(&cmd), start + Duration::from_secs(2));
        assert!((integ.state().position("elbow_flex").unwrap() - 15.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_positions_stay_within_limits(
            steps in prop::collection::vec(
                (prop::collection::vec(-1.0e6f64..1.0e6, 6), 0.0f64..10.0),
                1..40,
            )
        ) {
            let joints = JointSpec::lekiwi_arm();
            let mut integ = VelocityIntegrator::new(&joints, IntegratorParams::default());

            for (vels, dt) in steps {
                let input: BTreeMap<String, f64> = joints
                    .iter()
                    .zip(vels)
                    .map(|(j, v)| (j.name.clone(), v))
                    .collect();
                integ.integrate(&input, dt);

                for (spec, (_, pos)) in joints.iter().zip(integ.state().iter()) {
                    prop_assert!(spec.limit().contains(pos));
                }
            }
        }

        #[test]
        fn prop_zero_input_leaves_state_unchanged(
            dt in 0.0f64..1.0e4,
            warmup in -5.0f64..5.0,
        ) {
            let joints = JointSpec::lekiwi_arm();
            let mut integ = VelocityIntegrator::new(&joints, IntegratorParams::default());
            integ.integrate(&velocities(&[("wrist_roll", warmup)]), 0.5);
            let before = integ.state().positions.clone();

            let zeros: BTreeMap<String, f64> =
                joints.iter().map(|j| (j.name.clone(), 0.0)).collect();
            integ.integrate(&zeros, dt);

            prop_assert_eq!(&integ.state().positions, &before);
        }
    }
}
