use std::time::Duration;
use thiserror::Error;

/// Lifecycle errors surfaced synchronously to the host.
#[derive(Debug, Error)]
pub enum TeleopError {
    #[error("phone teleoperator is already connected, do not run `connect()` twice")]
    AlreadyConnected,

    #[error("phone teleoperator is not connected, run `connect()` first")]
    NotConnected,

    #[error("no phone connected within {timeout:?}")]
    ConnectionTimeout { timeout: Duration },

    #[error("invalid phone teleop config: {0}")]
    InvalidConfig(String),

    #[error("socket worker failure: {0}")]
    Worker(String),
}

/// Why an inbound frame was dropped. Never fatal to the read loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed command frame: {0}")]
    ParseFailure(String),

    /// `None` when the frame carries no usable `type` tag.
    #[error("unknown command type: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnknownType(Option<String>),
}
