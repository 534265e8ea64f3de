//! The `Cache` capability shared by every tier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;

/// Duration that disables expiration.
pub const NO_EXPIRATION: Duration = Duration::MAX;

/// Values that can be stored in any tier.
///
/// Local tiers share values between callers, remote tiers serialize them.
/// `Option<T>` is an ordinary value: a `None` result is cached like any other.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A cache that can produce a value for a key, computing it on a miss.
///
/// Implementations coordinate concurrent callers according to their own
/// policy; see [`LocalCache`](crate::LocalCache) for the single-flight one.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get the value for `key`, running `compute` if it is not cached.
    ///
    /// `duration` is how long a freshly computed value stays valid; use
    /// [`NO_EXPIRATION`] to keep it until invalidated. `cancel` is scoped to
    /// this call: when this caller is only waiting on somebody else's
    /// computation, cancelling abandons the wait and nothing else.
    async fn get_or_compute<V, F, Fut>(
        &self,
        key: &str,
        duration: Duration,
        compute: F,
        cancel: CancellationToken,
    ) -> Result<V, CacheError>
    where
        V: CacheValue,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<V, CacheError>> + Send;

    /// Discard whatever is cached for `key`.
    async fn invalidate(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<C: Cache> Cache for Arc<C> {
    async fn get_or_compute<V, F, Fut>(
        &self,
        key: &str,
        duration: Duration,
        compute: F,
        cancel: CancellationToken,
    ) -> Result<V, CacheError>
    where
        V: CacheValue,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<V, CacheError>> + Send,
    {
        self.as_ref()
            .get_or_compute(key, duration, compute, cancel)
            .await
    }

    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.as_ref().invalidate(key).await
    }
}
