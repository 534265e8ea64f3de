use std::sync::Arc;

use thiserror::Error;

/// Errors produced by cache operations.
///
/// The type is `Clone` because one failed computation is observed by the
/// leader and by every follower waiting on the same flight.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The caller-supplied compute function failed. Never cached.
    #[error("compute failed: {0}")]
    Compute(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The call was cancelled, either by the caller's own token or, for
    /// followers, by the leader abandoning the shared computation.
    #[error("operation cancelled")]
    Cancelled,

    /// A remote store or the invalidation channel could not be reached.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Invalid configuration detected while constructing a component.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// An invalidation payload that could not be decoded.
    #[error("malformed invalidation message: {0}")]
    MalformedMessage(String),

    /// The value stored under a key has a different type than requested.
    #[error("cached value is not of type {expected}")]
    TypeMismatch { expected: &'static str },
}

impl CacheError {
    /// Wrap an arbitrary error raised by a compute function.
    pub fn compute<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Compute(Arc::new(error))
    }

    /// Create a new TransportUnavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::TransportUnavailable(message.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
