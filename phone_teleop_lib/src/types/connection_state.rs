use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Link state between the bridge and the phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// State cell shared between the socket worker (writer) and the facade (reader).
///
/// Besides the state it counts peer sessions: every time a phone connects the
/// session number moves forward, which lets the reader tell a fresh peer from
/// the one it was last polling.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    inner: Arc<StatusCell>,
}

#[derive(Debug, Default)]
struct StatusCell {
    state: AtomicU8,
    session: AtomicU64,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Stores `state` and returns the one it replaced
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.swap(state as u8, Ordering::AcqRel))
    }

    pub fn session(&self) -> u64 {
        self.inner.session.load(Ordering::Acquire)
    }

    /// Marks a new peer session as connected and returns its number
    pub fn begin_session(&self) -> u64 {
        let session = self.inner.session.fetch_add(1, Ordering::AcqRel) + 1;
        self.set(ConnectionState::Connected);
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_starts_disconnected() {
        let status = ConnectionStatus::new();
        assert_eq!(status.state(), ConnectionState::Disconnected);
        assert_eq!(status.session(), 0);
    }

    #[test]
    fn test_sessions_advance_on_connect() {
        let status = ConnectionStatus::new();
        let reader = status.clone();

        assert_eq!(status.set(ConnectionState::Connecting), ConnectionState::Disconnected);
        assert_eq!(status.begin_session(), 1);
        assert_eq!(reader.state(), ConnectionState::Connected);

        status.set(ConnectionState::Disconnected);
        assert_eq!(status.begin_session(), 2);
        assert_eq!(reader.session(), 2);
    }
}
