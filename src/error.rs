//! Error types for windowgate.

use thiserror::Error;

/// Main error type for windowgate operations.
///
/// Exceeding a quota is not an error: it is reported through
/// [`Decision::allowed`](crate::ratelimit::Decision::allowed).
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The backing store could not complete a batch (network, timeout,
    /// protocol or reply-shape failure). Never retried by the limiter.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A window or policy parameter was out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QuotaError {
    fn from(err: redis::RedisError) -> Self {
        QuotaError::StoreUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for QuotaError {
    fn from(err: config::ConfigError) -> Self {
        QuotaError::Config(err.to_string())
    }
}

/// Result type alias for windowgate operations.
pub type Result<T> = std::result::Result<T, QuotaError>;
