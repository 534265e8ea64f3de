//! Cache backend selected at startup.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use layercache_core::{
    Cache, CacheError, CacheValue, CompositeCache, InvalidationPropagator, LocalCache,
    LocalCacheStats, RemoteCache,
};
use tokio_util::sync::CancellationToken;

use crate::store::RedisStore;
use crate::transport::RedisTransport;

/// Local near tier, Redis far tier, invalidations over Redis pub/sub.
pub type DistributedCache =
    InvalidationPropagator<CompositeCache<LocalCache, RemoteCache<RedisStore>>, RedisTransport>;

/// The cache a process actually runs with.
///
/// ## Cache Modes
///
/// - **Local**: single-process mode, [`LocalCache`] only
/// - **Distributed**: near [`LocalCache`] + Redis, kept coherent across
///   processes through pub/sub
pub enum CacheBackend {
    Local(LocalCache),
    Distributed(DistributedCache),
}

impl CacheBackend {
    pub fn new_local() -> Self {
        CacheBackend::Local(LocalCache::new())
    }

    /// "local" or "redis".
    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Local(_) => "local",
            CacheBackend::Distributed(_) => "redis",
        }
    }

    /// Statistics of the in-process tier.
    pub fn local_stats(&self) -> LocalCacheStats {
        match self {
            CacheBackend::Local(local) => local.stats(),
            CacheBackend::Distributed(cache) => cache.inner().near().stats(),
        }
    }

    /// Stop background work. Local mode has none.
    pub async fn shutdown(&self) {
        if let CacheBackend::Distributed(cache) = self {
            cache.shutdown().await;
        }
    }
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackend::Local(local) => f.debug_tuple("Local").field(local).finish(),
            CacheBackend::Distributed(cache) => f.debug_tuple("Distributed").field(cache).finish(),
        }
    }
}

#[async_trait]
impl Cache for CacheBackend {
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
        match self {
            CacheBackend::Local(local) => local.get_or_compute(key, duration, compute, cancel).await,
            CacheBackend::Distributed(cache) => {
                cache.get_or_compute(key, duration, compute, cancel).await
            }
        }
    }

    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        match self {
            CacheBackend::Local(local) => local.invalidate(key).await,
            CacheBackend::Distributed(cache) => cache.invalidate(key).await,
        }
    }
}
