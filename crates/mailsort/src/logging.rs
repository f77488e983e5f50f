//! Process-wide tracing subscriber.
//!
//! Library code logs through both `log` and `tracing`; `log` records are
//! bridged into the subscriber so one filter governs everything.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// `RUST_LOG` wins over the configured level when set.
pub fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| LoggingError::Filter {
        filter: level.to_string(),
        reason: e.to_string(),
    })
}

pub fn init(level: &str, json: bool) -> Result<(), LoggingError> {
    let filter = env_filter(level)?;

    let plain = (!json).then(|| fmt::layer().with_target(true));
    let structured = json.then(|| fmt::layer().json().with_current_span(true));
    let subscriber = Registry::default().with(filter).with(plain).with(structured);

    tracing_log::LogTracer::init().map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    Ok(())
}
