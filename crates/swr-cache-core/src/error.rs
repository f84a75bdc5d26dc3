//! Error types for cache operations

use thiserror::Error;

/// Main error type for all cache operations
///
/// Only `InvalidArgument` and `ValueAccessOnMiss` ever reach callers of the
/// engine; every other kind is folded into a miss (with metrics and logs)
/// before it crosses the public surface.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Malformed key, empty segment, or policy value out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The application loader failed to resolve a key
    #[error("loader failed for key {key}: {reason}")]
    LoaderFailed { key: String, reason: String },

    /// Store I/O failed at a non-recoverable layer
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The per-key lock could not be acquired in time
    #[error("lock timeout for key: {0}")]
    LockTimeout(String),

    /// `value()` was called on a `Miss` result
    #[error("value access on cache miss")]
    ValueAccessOnMiss,

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Backend connection failed
    #[error("connection error: {0}")]
    Connection(String),
}

impl CacheError {
    /// Shorthand for an `InvalidArgument` error
    pub fn invalid(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }

    /// Shorthand for a `LoaderFailed` error
    pub fn loader(key: impl Into<String>, reason: impl Into<String>) -> Self {
        CacheError::LoaderFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Serialization` error tagged with the format name
    pub fn encoding(format: &str, err: impl std::fmt::Display) -> Self {
        CacheError::Serialization(format!("{format}: {err}"))
    }

    /// Shorthand for a `Deserialization` error tagged with the format name
    pub fn decoding(format: &str, err: impl std::fmt::Display) -> Self {
        CacheError::Deserialization(format!("{format}: {err}"))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
