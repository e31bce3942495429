use crate::{
    BaseVelocity, CommandMessage, CommandQueue, ConnectionState, ConnectionStatus, FeatureKind,
    FeatureSpec, IntegratorParams, PhoneTeleopConfig, QueuedCommand, TelemetryPayload,
    TeleopAction, TeleopError, VelocityIntegrator, VelocityLimits, WorkerHandle, THETA_VEL, X_VEL,
    Y_VEL,
};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Key of the robot state vector in feedback payloads
pub const STATE_FEEDBACK_KEY: &str = "observation.state";

/// Caller-thread side of the bridge: which command is current and where the joints are.
#[derive(Debug)]
pub struct CommandTracker {
    limits: VelocityLimits,
    integrator: VelocityIntegrator,
    current: Option<QueuedCommand>,
    session: u64,
}

impl CommandTracker {
    pub fn new(config: &PhoneTeleopConfig) -> Self {
        let params = IntegratorParams {
            deadband: config.deadband,
            scale: config.position_scale,
        };
        Self {
            limits: config.velocity_limits(),
            integrator: VelocityIntegrator::new(&config.joints, params),
            current: None,
            session: 0,
        }
    }

    pub fn current(&self) -> Option<&CommandMessage> {
        self.current.as_ref().map(|c| &c.command)
    }

    /// Pick up the freshest queued command and integrate joints up to `now`.
    ///
    /// `live_session` is the session the connection reports right now. Commands
    /// from any earlier session are never applied.
    pub fn poll(&mut self, live_session: u64, queue: &CommandQueue, now: Instant) -> TeleopAction {
        if live_session > self.session {
            self.begin_session(live_session, now);
        }

        if let Some(latest) = queue.drain_latest() {
            if latest.session > self.session {
                self.begin_session(latest.session, now);
            }
            if latest.session == self.session {
                self.current = Some(latest);
            }
        }

        let command = self.current.as_ref().map(|c| &c.command);
        let base = command
            .map(|c| c.base_velocity(&self.limits))
            .unwrap_or_else(BaseVelocity::zero);
        let joints = self
            .integrator
            .advance(command.and_then(CommandMessage::joint_velocities), now)
            .clone();

        TeleopAction { base, joints }
    }

    /// Forget the current command, e.g. after the host disconnects
    pub fn reset(&mut self, now: Instant) {
        self.current = None;
        self.integrator.restart_clock(now);
    }

    /// Start over for a new status cell whose sessions count from zero again
    pub fn restart(&mut self, now: Instant) {
        self.session = 0;
        self.reset(now);
    }

    fn begin_session(&mut self, session: u64, now: Instant) {
        debug!("Phone session {} took over, clearing previous command", session);
        self.session = session;
        self.reset(now);
    }
}

/// Phone teleoperator: the host-facing bridge.
///
/// `connect`/`disconnect` manage the socket worker; `get_action` and
/// `send_feedback` never touch the network and never block on it.
pub struct PhoneTeleop {
    config: PhoneTeleopConfig,
    status: ConnectionStatus,
    commands: Arc<CommandQueue>,
    worker: Option<WorkerHandle>,
    tracker: CommandTracker,
    last_read: Duration,
}

impl PhoneTeleop {
    pub const NAME: &'static str = "phone";

    /// Rejects a config that `PhoneTeleopConfig::validate` does not accept
    pub fn new(config: PhoneTeleopConfig) -> Result<Self, TeleopError> {
        config
            .validate()
            .map_err(|e| TeleopError::InvalidConfig(e.to_string()))?;

        let commands = Arc::new(CommandQueue::new(config.command_queue_capacity));
        let tracker = CommandTracker::new(&config);
        Ok(Self {
            config,
            status: ConnectionStatus::new(),
            commands,
            worker: None,
            tracker,
            last_read: Duration::ZERO,
        })
    }

    pub fn config(&self) -> &PhoneTeleopConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Lifecycle started and a phone is on the other end right now
    pub fn is_connected(&self) -> bool {
        self.worker.is_some() && self.status.state().is_connected()
    }

    /// Time spent in the last `get_action` call
    pub fn last_read_duration(&self) -> Duration {
        self.last_read
    }

    /// Start the socket worker and wait until a phone is connected or the
    /// configured timeout runs out. The worker keeps reconnecting afterwards.
    pub fn connect(&mut self) -> Result<(), TeleopError> {
        if self.worker.is_some() {
            return Err(TeleopError::AlreadyConnected);
        }

        info!(
            "Starting phone teleoperator ({:?} role, timeout {:.1}s)",
            self.config.role, self.config.connection_timeout_s
        );

        self.fresh_link(Instant::now());

        let (worker, ready) = WorkerHandle::spawn(
            self.config.clone(),
            self.status.clone(),
            self.commands.clone(),
        )?;

        let timeout = self.config.connection_timeout();
        match ready.recv_timeout(timeout) {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                info!("Phone teleoperator connected");
                Ok(())
            }
            Ok(Err(reason)) => {
                self.abandon(worker);
                Err(TeleopError::Worker(reason))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("No phone connected within {:.1}s", timeout.as_secs_f64());
                self.abandon(worker);
                Err(TeleopError::ConnectionTimeout { timeout })
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.abandon(worker);
                Err(TeleopError::Worker(
                    "socket worker exited before a phone connected".to_string(),
                ))
            }
        }
    }

    /// Stop the socket worker. Once this returns the command queue receives nothing more.
    pub fn disconnect(&mut self) -> Result<(), TeleopError> {
        let worker = self.worker.take().ok_or(TeleopError::NotConnected)?;

        info!("Disconnecting phone teleoperator");
        self.abandon(worker);
        self.tracker.reset(Instant::now());
        info!("Phone teleoperator disconnected");
        Ok(())
    }

    /// Latest command from the phone: clamped base velocities plus joint
    /// targets integrated up to now. Reuses the previous command when nothing
    /// new arrived.
    pub fn get_action(&mut self) -> Result<TeleopAction, TeleopError> {
        let started = Instant::now();

        if !self.is_connected() {
            return Err(TeleopError::NotConnected);
        }

        let action = self
            .tracker
            .poll(self.status.session(), &self.commands, started);

        self.last_read = started.elapsed();
        Ok(action)
    }

    /// Fire-and-forget feedback to the phone. Silently dropped when no phone is connected.
    pub fn send_feedback(&self, payload: TelemetryPayload) {
        if !self.is_connected() {
            return;
        }
        if let Some(worker) = &self.worker {
            worker.try_send_feedback(payload);
        }
    }

    /// Named fields of the action returned by `get_action`
    pub fn action_features(&self) -> Vec<FeatureSpec> {
        [X_VEL, Y_VEL, THETA_VEL]
            .into_iter()
            .map(|name| FeatureSpec::new(name, FeatureKind::Velocity))
            .chain(
                self.config
                    .joints
                    .iter()
                    .map(|j| FeatureSpec::new(format!("{}.pos", j.name), FeatureKind::Position)),
            )
            .collect()
    }

    /// Named fields the phone knows how to display
    pub fn feedback_features(&self) -> Vec<FeatureSpec> {
        self.config
            .cameras
            .iter()
            .map(|cam| FeatureSpec::new(cam.clone(), FeatureKind::Image))
            .chain(std::iter::once(FeatureSpec::new(
                STATE_FEEDBACK_KEY,
                FeatureKind::State,
            )))
            .collect()
    }

    /// Give the next worker its own status cell and queue. A previous worker
    /// that missed its stop deadline only ever writes into the old pair.
    fn fresh_link(&mut self, now: Instant) {
        self.commands.close();
        self.commands = Arc::new(CommandQueue::new(self.config.command_queue_capacity));
        self.status = ConnectionStatus::new();
        self.tracker.restart(now);
    }

    fn abandon(&mut self, worker: WorkerHandle) {
        self.commands.close();
        let wait = self.config.disconnect_timeout();
        if !worker.stop(wait) {
            warn!(
                "Phone link worker did not stop within {:.1}s",
                wait.as_secs_f64()
            );
        }
        self.status.set(ConnectionState::Disconnected);
    }
}

impl Drop for PhoneTeleop {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.abandon(worker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode_command, ActionCommand, JointLimit, JointSpec, JoystickInput, PushOutcome};

    fn config() -> PhoneTeleopConfig {
        PhoneTeleopConfig {
            max_linear_velocity: 0.25,
            ..Default::default()
        }
    }

    fn action(text: &str) -> CommandMessage {
        decode_command(text).unwrap()
    }

    #[test]
    fn test_scenario_clamp_and_integrate() {
        let queue = CommandQueue::new(10);
        let mut tracker = CommandTracker::new(&config());
        let t0 = Instant::now();
        tracker.poll(1, &queue, t0);

        queue.push(1, action(r#"{"type":"action","x.vel":0.3,"shoulder_pan.vel":1.0}"#));
        let first = tracker.poll(1, &queue, t0);
        assert_eq!(first.base.x, 0.25);
        assert_eq!(first.joints.position("shoulder_pan"), Some(0.0));

        let later = tracker.poll(1, &queue, t0 + Duration::from_millis(500));
        assert!((later.joints.position("shoulder_pan").unwrap() - 30.0).abs() < 1e-9);

        let much_later = tracker.poll(1, &queue, t0 + Duration::from_secs(10));
        assert_eq!(much_later.joints.position("shoulder_pan"), Some(100.0));
    }

    #[test]
    fn test_sticky_latest_when_queue_empty() {
        let queue = CommandQueue::new(10);
        let mut tracker = CommandTracker::new(&config());
        let stick = CommandMessage::Joystick(JoystickInput { x: 0.0, y: 1.0 });
        queue.push(1, stick.clone());

        let t0 = Instant::now();
        for i in 0..5 {
            let act = tracker.poll(1, &queue, t0 + Duration::from_millis(i * 20));
            assert_eq!(tracker.current(), Some(&stick));
            assert_eq!(act.base.x, 0.25);
        }
    }

    #[test]
    fn test_overflow_drains_to_newest() {
        let queue = CommandQueue::new(10);
        let mut tracker = CommandTracker::new(&config());
        for i in 0..30 {
            queue.push(
                1,
                CommandMessage::Action(ActionCommand {
                    base: crate::BaseVelocity::new(i as f64 / 1000.0, 0.0, 0.0),
                    ..Default::default()
                }),
            );
        }

        let act = tracker.poll(1, &queue, Instant::now());
        assert!((act.base.x - 0.029).abs() < 1e-12);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_emergency_stop_freezes_joints() {
        let queue = CommandQueue::new(10);
        let mut tracker = CommandTracker::new(&config());
        let t0 = Instant::now();
        tracker.poll(1, &queue, t0);

        queue.push(1, action(r#"{"type":"action","x.vel":0.1,"elbow_flex.vel":0.5}"#));
        tracker.poll(1, &queue, t0);
        let moving = tracker.poll(1, &queue, t0 + Duration::from_secs(1));
        let elbow = moving.joints.position("elbow_flex").unwrap();
        assert!((elbow - 30.0).abs() < 1e-9);

        queue.push(1, CommandMessage::EmergencyStop);
        let stopped = tracker.poll(1, &queue, t0 + Duration::from_secs(3));
        assert!(stopped.base.is_zero());
        assert_eq!(stopped.joints.position("elbow_flex"), Some(elbow));
    }

    #[test]
    fn test_new_session_discards_previous_command() {
        let queue = CommandQueue::new(10);
        let mut tracker = CommandTracker::new(&config());
        let t0 = Instant::now();

        queue.push(1, action(r#"{"type":"action","y.vel":0.2}"#));
        assert_eq!(tracker.poll(1, &queue, t0).base.y, 0.2);

        // Peer reconnected: the old command must not keep driving
        assert!(tracker.poll(2, &queue, t0).base.is_zero());

        // A leftover frame from the old peer is ignored
        queue.push(1, action(r#"{"type":"action","y.vel":0.2}"#));
        assert!(tracker.poll(2, &queue, t0).base.is_zero());

        queue.push(2, action(r#"{"type":"action","y.vel":-0.1}"#));
        assert_eq!(tracker.poll(2, &queue, t0).base.y, -0.1);

        // Fresh status cell after a reconnect: sessions count from one again
        tracker.restart(t0);
        queue.push(1, action(r#"{"type":"action","y.vel":0.05}"#));
        assert_eq!(tracker.poll(1, &queue, t0).base.y, 0.05);
    }

    #[test]
    fn test_lifecycle_errors_without_connection() {
        let mut teleop = PhoneTeleop::new(config()).unwrap();

        assert!(matches!(teleop.get_action(), Err(TeleopError::NotConnected)));
        assert!(matches!(teleop.disconnect(), Err(TeleopError::NotConnected)));
        assert!(!teleop.is_connected());
        assert_eq!(teleop.state(), ConnectionState::Disconnected);

        // Not connected: feedback is a silent no-op
        teleop.send_feedback(TelemetryPayload::new());
    }

    #[test]
    fn test_feature_descriptors() {
        let teleop = PhoneTeleop::new(config()).unwrap();

        let names: Vec<String> = teleop.action_features().into_iter().map(|f| f.name).collect();
        assert_eq!(&names[..3], &["x.vel", "y.vel", "theta.vel"]);
        assert_eq!(names.len(), 9);
        assert_eq!(names[8], "gripper.pos");

        let feedback = teleop.feedback_features();
        assert_eq!(feedback.len(), 3);
        assert_eq!(feedback[0], FeatureSpec::new("front", FeatureKind::Image));
        assert_eq!(feedback[2].kind, FeatureKind::State);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let negative_timeout = PhoneTeleopConfig {
            connection_timeout_s: -1.0,
            ..config()
        };
        assert!(matches!(
            PhoneTeleop::new(negative_timeout),
            Err(TeleopError::InvalidConfig(_))
        ));

        let mut inverted_joint = config();
        inverted_joint.joints[0] = JointSpec::new("shoulder_pan", 0.0, JointLimit::new(10.0, -10.0));
        assert!(matches!(
            PhoneTeleop::new(inverted_joint),
            Err(TeleopError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fresh_link_isolates_previous_worker() {
        let mut teleop = PhoneTeleop::new(config()).unwrap();
        let stale_queue = teleop.commands.clone();
        let stale_status = teleop.status.clone();

        teleop.fresh_link(Instant::now());

        // A worker that outlived its stop deadline writes nowhere the facade reads
        assert_eq!(stale_queue.push(1, CommandMessage::EmergencyStop), PushOutcome::Closed);
        stale_status.begin_session();
        assert_eq!(teleop.state(), ConnectionState::Disconnected);
        assert!(teleop.commands.is_empty());
        assert!(!teleop.commands.is_closed());
        assert!(!Arc::ptr_eq(&stale_queue, &teleop.commands));
    }
}
