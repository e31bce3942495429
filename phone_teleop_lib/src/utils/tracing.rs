//! Centralized tracing initialization for the teleop host process.
//!
//! The bridge logs from two threads: the caller's control loop and the socket
//! worker. The subscriber is therefore installed process-wide rather than as a
//! thread-local default.

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the whole process.
///
/// - Respects RUST_LOG environment variable (defaults to "info")
/// - Outputs clean, compact logs without extra metadata
///
/// Returns `false` when a global subscriber was already installed, in which
/// case the existing one keeps receiving events.
///
/// # Example
/// ```no_run
/// use phone_teleop_lib::init_tracing;
///
/// fn main() {
///     init_tracing();
///     // Your node code here
/// }
/// ```
pub fn init_tracing() -> bool {
    use tracing_subscriber::layer::SubscriberExt;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let subscriber = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
