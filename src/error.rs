//! Error types for the counter engine.

use thiserror::Error;

/// Main error type for counter operations.
#[derive(Error, Debug)]
pub enum CounterError {
    /// Invalid scope, TTL or limit. Raised at construction, never at runtime.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing cache could not serve a get/create/increment call.
    #[error("Counter cache unavailable: {0}")]
    Backend(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CounterError {
    /// Whether this error came from the cache backend rather than configuration.
    pub fn is_backend(&self) -> bool {
        matches!(self, CounterError::Backend(_))
    }
}

impl From<::config::ConfigError> for CounterError {
    fn from(err: ::config::ConfigError) -> Self {
        CounterError::Config(err.to_string())
    }
}

/// Result type alias for counter operations.
pub type Result<T> = std::result::Result<T, CounterError>;
