//! # Phone Teleop Library
//!
//! Bridge between a handheld phone controller and the host control loop.
//! The phone streams velocity commands over a persistent WebSocket, the host
//! polls the freshest command with [`PhoneTeleop::get_action`] and pushes
//! camera/state feedback back with [`PhoneTeleop::send_feedback`].

pub mod bridge;
pub mod types;
pub mod utils;

// Re-export everything for convenience
pub use bridge::*;
pub use types::*;
pub use utils::*;
