pub mod action;
pub mod command;
pub mod config;
pub mod connection_state;
pub mod error;
pub mod joint_state;
pub mod telemetry;

pub use action::*;
pub use command::*;
pub use config::*;
pub use connection_state::*;
pub use error::*;
pub use joint_state::*;
pub use telemetry::*;
