//! Error types for Tollgate.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller's wait was cancelled before a slot was granted
    #[error("Acquire cancelled before admission")]
    Cancelled,

    /// The caller's deadline elapsed before a slot was granted
    #[error("Deadline of {0:?} exceeded, not admitted")]
    DeadlineExceeded(Duration),

    /// The controller has been closed
    #[error("Admission controller closed")]
    Closed,

    /// No slot is free right now
    #[error("No admission slot available, retry after {retry_after:?}")]
    WouldBlock { retry_after: Duration },

    /// The gated operation failed
    #[error("Submit error: {0}")]
    Submit(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    /// Check if the error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if the controller can never admit again after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Closed)
    }
}

impl From<::config::ConfigError> for TollgateError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
