//! `tracing` subscriber setup.
//!
//! The library only emits events; installing a subscriber is up to the
//! application. [`init`] is a convenience for binaries and tests.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber.
///
/// The filter is taken from `filter`, else from `RUST_LOG`, else `info`.
/// Returns `false` if a global subscriber was already installed or the
/// filter directive is invalid.
///
/// # Examples
///
/// ```
/// let _ = respipe::logging::init(Some("respipe=debug"));
/// ```
pub fn init(filter: Option<&str>) -> bool {
    let filter = match filter {
        Some(directive) => match EnvFilter::try_new(directive) {
            Ok(filter) => filter,
            Err(_) => return false,
        },
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
