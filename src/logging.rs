//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; binaries, benches and tests decide where
//! they go. `RUST_LOG` controls the filter (default: `info`).

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Install a fmt subscriber filtered by `RUST_LOG`
///
/// Returns `false` when a global subscriber was already installed, which is common in
/// test binaries; the existing one is left in place.
pub fn init_logging() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

/// Install a fmt subscriber with an explicit filter directive, e.g. `"absim=debug"`
pub fn init_logging_with(filter: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(filter)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    tracing::debug!(filter, "Logging initialized");
    Ok(())
}
