pub mod connection;
pub mod queue;
pub mod teleop;

pub use connection::*;
pub use queue::*;
pub use teleop::*;
