//! Process-wide subscriber installation.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

static INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// Another global subscriber was installed outside this crate.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install a human-readable subscriber.
///
/// The level comes from `RUST_LOG` and defaults to `info`:
///
/// ```bash
/// RUST_LOG=pcaf_pipeline=debug pcaf run
/// ```
///
/// Calling this again after a successful install does nothing.
///
/// # Errors
///
/// Returns an error if a different global subscriber is already set.
pub fn init_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    if INSTALLED.load(Ordering::Acquire) {
        return Ok(());
    }
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt::layer().with_target(true).with_level(true))
        .try_init()?;
    installed(service_name, "text");
    Ok(())
}

/// Install a subscriber writing one JSON object per line, with span fields
/// flattened into each event.
pub fn init_json_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    if INSTALLED.load(Ordering::Acquire) {
        return Ok(());
    }
    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt::layer().json().with_current_span(true).with_span_list(false))
        .try_init()?;
    installed(service_name, "json");
    Ok(())
}

fn installed(service_name: &str, format: &str) {
    INSTALLED.store(true, Ordering::Release);
    tracing::debug!(service = service_name, format, "telemetry initialized");
}

fn env_filter() -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new("info")?),
    }
}
