//! Construction-time errors.
//!
//! These are the only pipeline failures that reach the caller. Everything
//! that happens after construction (network failures, throttling, store
//! exhaustion) is absorbed and logged inside the pipeline.

use thiserror::Error;

/// Result type alias for pipeline construction.
pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Invalid pipeline configuration, surfaced immediately at build time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no delivery target configured")]
    MissingTarget,

    #[error("buffer capacity must be greater than zero")]
    ZeroCapacity,

    #[error("buffer timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigurationError {
    /// Stable error code (10-19 range, shared with config errors).
    pub fn code(&self) -> u32 {
        match self {
            ConfigurationError::MissingTarget => 10,
            ConfigurationError::ZeroCapacity => 11,
            ConfigurationError::ZeroTimeout => 12,
            ConfigurationError::InvalidEndpoint { .. } => 13,
            ConfigurationError::InvalidValue { .. } => 14,
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}
