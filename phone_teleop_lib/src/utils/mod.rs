pub mod codec;
pub mod tracing;
pub mod velocity_integrator;

pub use codec::*;
pub use tracing::*;
pub use velocity_integrator::*;
