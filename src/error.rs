//! Error types.
//!
//! - `CoreError`: failures raised by the marker core (alignment, balancing,
//!   best-epoch selection, consolidation, feature preparation). Per-class and
//!   per-parcel variants are recoverable; the orchestrator aggregates them into
//!   the run report.
//! - `AppError`: what the `marker` binary reports (message + process exit code).

use chrono::NaiveDate;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// The aligned period has zero or negative length.
    #[error("Invalid period: aligned start {start} is not before aligned end {end}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },

    /// A class has no eligible samples while the strategy requires a floor.
    #[error("Class '{class}' has no eligible samples for balancing strategy {strategy}")]
    InsufficientSamples { class: String, strategy: &'static str },

    /// No training history to select a best epoch from.
    #[error("No epoch metrics available to select a best model")]
    NoMetrics,

    #[error("Invalid epoch metric at epoch {epoch}: {reason}")]
    InvalidMetric { epoch: usize, reason: String },

    #[error("Invalid prediction for parcel '{parcel_id}': {reason}")]
    InvalidPrediction { parcel_id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Date arithmetic left chrono's supported range.
    #[error("Date out of range while aligning {0}")]
    DateOutOfRange(NaiveDate),

    /// Feature preparation left no usable rows or columns.
    #[error("Feature table is empty after preparation: {0}")]
    EmptyFeatures(String),

    /// Failure reported by the external model capability.
    #[error("Model error: {0}")]
    Model(String),
}

impl CoreError {
    /// Exit code used by the binary when this error ends a command.
    pub fn exit_code(&self) -> u8 {
        match self {
            CoreError::InvalidConfig(_) => 2,
            CoreError::InvalidPeriod { .. } | CoreError::NoMetrics | CoreError::EmptyFeatures(_) => 3,
            _ => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
