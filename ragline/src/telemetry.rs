//! Tracing subscriber setup for binaries and tests built on this crate.
//!
//! Library code only emits `tracing` events; installing a subscriber is up to
//! the application. These helpers install a `fmt` subscriber filtered by
//! `RUST_LOG`, falling back to `ragline=info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "ragline=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable subscriber.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

/// Install a subscriber writing one JSON object per event.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing_json() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
        .try_init()
        .is_ok()
}
