//! Error types for the recipe limiter.

use thiserror::Error;

/// Main error type for limiter operations.
///
/// Store failures never surface here: `check_limit` fails open, and callers
/// outside the request path handle `StoreError` directly.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-positive limit or window, fatal at startup
    #[error("Misconfigured limiter: {0}")]
    Misconfigured(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
