//! Far tier backed by a shared key/value store.
//!
//! The store is a collaborator that may be unavailable at any time. Every
//! store failure degrades to "no cache" for the call at hand: the value is
//! computed and returned, just not shared.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheValue, NO_EXPIRATION};
use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use crate::serializer::{JsonSerializer, ValueSerializer};

/// Byte-oriented key/value store shared between processes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value`; `ttl` of `None` keeps it until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Returns `true` if something was deleted.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}

#[async_trait]
impl<S: RemoteStore> RemoteStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.as_ref().get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.as_ref().set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.as_ref().delete(key).await
    }
}

// ============================================================================
// In-memory store
// ============================================================================

struct StoredBytes {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// [`RemoteStore`] kept in process memory.
///
/// Stands in for a real store in tests and single-process setups. Expired
/// values are dropped lazily on read.
pub struct MemoryStore {
    values: DashMap<String, StoredBytes>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            values: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored values, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::unavailable("memory store is offline"))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("values", &self.values.len())
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.ensure_available()?;
        let now = self.clock.now();
        match self.values.get(key) {
            None => return Ok(None),
            Some(stored) if stored.expires_at.is_none_or(|at| at > now) => {
                return Ok(Some(stored.value.clone()));
            }
            Some(_) => {}
        }
        self.values
            .remove_if(key, |_, stored| stored.expires_at.is_some_and(|at| at <= now));
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.ensure_available()?;
        let expires_at = ttl.and_then(|ttl| self.clock.now().checked_add(ttl));
        self.values
            .insert(key.to_owned(), StoredBytes { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_available()?;
        Ok(self.values.remove(key).is_some())
    }
}

// ============================================================================
// Remote cache
// ============================================================================

/// [`Cache`] over a [`RemoteStore`].
///
/// Keys are prefixed before reaching the store so several applications can
/// share one. There is no coalescing here: put a [`LocalCache`](crate::LocalCache)
/// in front with a [`CompositeCache`](crate::CompositeCache).
pub struct RemoteCache<S, Z = JsonSerializer> {
    store: S,
    serializer: Z,
    prefix: String,
}

impl<S: RemoteStore> RemoteCache<S> {
    /// Remote cache storing JSON.
    pub fn new(store: S) -> Self {
        Self::with_serializer(store, JsonSerializer)
    }
}

impl<S: RemoteStore, Z: ValueSerializer> RemoteCache<S, Z> {
    pub fn with_serializer(store: S, serializer: Z) -> Self {
        Self {
            store,
            serializer,
            prefix: String::new(),
        }
    }

    /// Prepend `prefix` to every key sent to the store.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn write_back<V: CacheValue>(&self, store_key: &str, value: &V, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let ttl = (duration != NO_EXPIRATION).then_some(duration);

        let bytes = match self.serializer.serialize(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %store_key, error = %e, "failed to serialize value for remote cache");
                return;
            }
        };
        if let Err(e) = self.store.set(store_key, bytes, ttl).await {
            warn!(key = %store_key, error = %e, "failed to write to remote cache");
        }
    }
}

impl<S: std::fmt::Debug, Z> std::fmt::Debug for RemoteCache<S, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("store", &self.store)
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl<S: RemoteStore, Z: ValueSerializer> Cache for RemoteCache<S, Z> {
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
        let store_key = self.store_key(key);

        match self.store.get(&store_key).await {
            Ok(Some(bytes)) => match self.serializer.deserialize::<V>(&bytes) {
                Ok(value) => {
                    debug!(key = %store_key, "cache hit (remote)");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key = %store_key, error = %e, "undecodable remote value, recomputing");
                }
            },
            Ok(None) => debug!(key = %store_key, "cache miss (remote), computing"),
            Err(e) => {
                warn!(key = %store_key, error = %e, "remote cache unavailable, computing without it");
                return compute(cancel).await;
            }
        }

        let value = compute(cancel).await?;
        self.write_back(&store_key, &value, duration).await;
        Ok(value)
    }

    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let store_key = self.store_key(key);
        match self.store.delete(&store_key).await {
            Ok(deleted) => debug!(key = %store_key, deleted, "cache invalidated (remote)"),
            Err(e) => warn!(key = %store_key, error = %e, "failed to delete from remote cache"),
        }
        Ok(())
    }
}
