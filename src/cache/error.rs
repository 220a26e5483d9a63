//! Cache error types.

use thiserror::Error;

/// Errors raised by cache stores and the codec.
///
/// None of these reach a request: serialization errors read as a miss and
/// store errors push the cache into degraded mode.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store could not be reached in time.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded, or a stored value could not be decoded.
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// The store answered with an error.
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// Whether the error says something about store health.
    pub fn is_store_failure(&self) -> bool {
        !matches!(self, CacheError::Serialization(_))
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
