//! Logging setup for the `marker` binary.
//!
//! Installs a global `tracing` subscriber writing to stderr, so stdout stays
//! reserved for command output. The filter comes from `MARKER_LOG` when set
//! (e.g. `MARKER_LOG=crop_markers=debug`), else from the configured level.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const LOG_ENV_VAR: &str = "MARKER_LOG";

static INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing_subscriber::util::TryInitError),
}

/// Initialize logging once. Subsequent calls are no-ops.
pub fn init(default_level: &str) -> Result<(), LoggingError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = build_env_filter(std::env::var(LOG_ENV_VAR).ok().as_deref(), default_level)?;
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(stderr_layer).try_init()?;
    let _ = INITIALIZED.set(());
    Ok(())
}

fn build_env_filter(from_env: Option<&str>, default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = match from_env {
        Some(value) if !value.trim().is_empty() => value,
        _ => default_level,
    };
    EnvFilter::try_new(directives).map_err(|source| LoggingError::InvalidFilter {
        filter: directives.to_string(),
        source,
    })
}
