//! Redis integration for layercache: far tier, invalidation channel,
//! configuration and backend selection.

pub mod backend;
pub mod config;
pub mod store;
pub mod transport;

use std::sync::Arc;

use deadpool_redis::{Pool, PoolConfig, Runtime, Timeouts};
use layercache_core::{CacheError, CompositeCache, InvalidationPropagator, LocalCache, RemoteCache};

pub use backend::{CacheBackend, DistributedCache};
pub use config::{CacheSettings, LocalConfig, RedisConfig};
pub use store::RedisStore;
pub use transport::RedisTransport;

/// Build a connection pool from configuration. Does not connect.
pub fn create_pool(config: &RedisConfig) -> Result<Pool, CacheError> {
    let timeout = Some(config.timeout());
    let mut pool_config = PoolConfig::new(config.pool_size);
    pool_config.timeouts = Timeouts {
        wait: timeout,
        create: timeout,
        recycle: timeout,
    };

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    redis_config.pool = Some(pool_config);
    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::configuration(format!("failed to create Redis pool: {e}")))
}

/// Connect to Redis and start listening for invalidations.
///
/// Fails if the server cannot be reached or the channel cannot be
/// subscribed to.
pub async fn connect_distributed(config: &RedisConfig) -> Result<DistributedCache, CacheError> {
    let pool = create_pool(config)?;

    // Test connection
    pool.get()
        .await
        .map_err(|e| CacheError::unavailable(format!("failed to connect to Redis: {e}")))?;

    let transport = RedisTransport::new(pool.clone(), &config.url, config.channel.clone())?;
    let far = RemoteCache::new(RedisStore::new(pool)).with_prefix(config.key_prefix.clone());
    let cache = Arc::new(CompositeCache::new(LocalCache::new(), far));

    InvalidationPropagator::start(cache, Arc::new(transport)).await
}

/// Create a cache backend based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: Returns local-only cache
/// - **Redis enabled**: Attempts to connect to Redis, falls back to local on failure
///
/// ## Graceful Degradation
///
/// If Redis cannot be reached the process still starts, with a cache that
/// is not shared and does not receive invalidations from other processes.
pub async fn create_cache_backend(settings: &CacheSettings) -> CacheBackend {
    let config = &settings.redis;
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheBackend::new_local();
    }

    tracing::info!(url = %config.url, channel = %config.channel, "Connecting to Redis");

    match connect_distributed(config).await {
        Ok(cache) => {
            tracing::info!(origin = %cache.origin(), "✓ Connected to Redis successfully");
            CacheBackend::Distributed(cache)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to set up Redis cache. Falling back to local cache."
            );
            CacheBackend::new_local()
        }
    }
}
