//! In-process cache tier with per-key single-flight.
//!
//! Each key owns a [`CoalescingEntry`]. Entries are created lazily and are
//! never removed: expired or invalidated entries are only reset, so memory
//! grows with the number of distinct keys ever used.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, CacheValue};
use crate::clock::{Clock, SystemClock};
use crate::entry::{CoalescingEntry, Join};
use crate::error::CacheError;

/// Local cache statistics.
#[derive(Debug, Clone, Default)]
pub struct LocalCacheStats {
    /// Number of keys that have an entry.
    pub entries: usize,
    /// Calls served by an existing (settled or in-flight) computation.
    pub hits: u64,
    /// Calls that had to start a computation.
    pub misses: u64,
}

impl LocalCacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Concurrent key → [`CoalescingEntry`] map.
///
/// Concurrent callers asking for the same missing key share one computation;
/// callers on different keys never wait on each other.
pub struct LocalCache {
    entries: DashMap<String, Arc<CoalescingEntry>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalCache {
    /// Create a local cache driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a local cache driven by `clock`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use layercache_core::{LocalCache, ManualClock};
    ///
    /// let clock = Arc::new(ManualClock::new());
    /// let cache = LocalCache::with_clock(clock.clone());
    /// assert!(cache.is_empty());
    /// ```
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Number of keys that have an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> LocalCacheStats {
        LocalCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Look up the entry for `key`, creating it if missing.
    ///
    /// Racing creators end up sharing whichever entry the map kept.
    fn entry(&self, key: &str) -> Arc<CoalescingEntry> {
        if let Some(entry) = self.entries.get(key) {
            return Arc::clone(entry.value());
        }
        Arc::clone(self.entries.entry(key.to_owned()).or_default().value())
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.entries.len())
            .field("clock", &self.clock)
            .finish()
    }
}

#[async_trait]
impl Cache for LocalCache {
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
        let entry = self.entry(key);
        let now = self.clock.now();

        match entry.join(now, duration) {
            Join::Leader(leader) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache miss (local), computing");
                leader.run(compute, cancel).await
            }
            Join::Follower(flight) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache hit (local)");
                flight.wait(&cancel).await
            }
        }
    }

    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let entry = self.entries.get(key).map(|entry| Arc::clone(entry.value()));
        if let Some(entry) = entry {
            let had_flight = entry.invalidate();
            tracing::debug!(key = %key, had_flight, "cache invalidated (local)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Barrier, oneshot};

    #[derive(Debug, thiserror::Error)]
    #[error("database unavailable")]
    struct DatabaseUnavailable;

    const TEN_SECONDS: Duration = Duration::from_secs(10);

    fn counting(
        calls: &Arc<AtomicUsize>,
        value: u64,
    ) -> impl FnOnce(CancellationToken) -> std::future::Ready<Result<u64, CacheError>> + Send {
        let calls = Arc::clone(calls);
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    #[tokio::test]
    async fn test_value_is_reused_until_ttl_elapses() {
        let clock = Arc::new(ManualClock::new());
        let cache = LocalCache::with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_compute("k", TEN_SECONDS, counting(&calls, 42), CancellationToken::new())
            .await
            .unwrap();
        let second = cache
            .get_or_compute("k", TEN_SECONDS, counting(&calls, 43), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!((first, second), (42, 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(9));
        let still_cached = cache
            .get_or_compute("k", TEN_SECONDS, counting(&calls, 44), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(still_cached, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        let refreshed = cache
            .get_or_compute("k", TEN_SECONDS, counting(&calls, 45), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(refreshed, 45);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_expiration_survives_clock_advance() {
        let clock = Arc::new(ManualClock::new());
        let cache = LocalCache::with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute("k", crate::NO_EXPIRATION, counting(&calls, 1), CancellationToken::new())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        let value = cache
            .get_or_compute("k", crate::NO_EXPIRATION, counting(&calls, 2), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = LocalCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute("k", TEN_SECONDS, counting(&calls, 1), CancellationToken::new())
            .await
            .unwrap();
        cache.invalidate("k").await.unwrap();
        let value = cache
            .get_or_compute("k", TEN_SECONDS, counting(&calls, 2), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_key_is_noop() {
        let cache = LocalCache::new();
        cache.invalidate("missing").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = LocalCache::new();

        let failed: Result<u64, _> = cache
            .get_or_compute(
                "k",
                TEN_SECONDS,
                |_| async { Err(CacheError::compute(DatabaseUnavailable)) },
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(failed, Err(CacheError::Compute(_))));

        let calls = Arc::new(AtomicUsize::new(0));
        let value = cache
            .get_or_compute("k", TEN_SECONDS, counting(&calls, 3), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(LocalCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(10));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    cache
                        .get_or_compute(
                            "shared-key",
                            Duration::from_secs(60),
                            move |_| async move {
                                calls.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                Ok(String::from("calculated-value"))
                            },
                            CancellationToken::new(),
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "calculated-value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_keys_compute_independently() {
        let cache = Arc::new(LocalCache::new());
        // Every computation waits for all the others: this only completes if
        // keys are not serialized behind each other.
        let rendezvous = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let rendezvous = Arc::clone(&rendezvous);
                tokio::spawn(async move {
                    cache
                        .get_or_compute(
                            &format!("key-{i}"),
                            Duration::from_secs(60),
                            move |_| async move {
                                rendezvous.wait().await;
                                Ok(i)
                            },
                            CancellationToken::new(),
                        )
                        .await
                })
            })
            .collect();

        let all = async {
            let mut values = Vec::new();
            for handle in handles {
                values.push(handle.await.unwrap().unwrap());
            }
            values
        };
        let values = tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("keys must not block each other");

        assert_eq!(values, (0..8).collect::<Vec<_>>());
        assert_eq!(cache.len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_follower_failure_and_cancellation() {
        let cache = Arc::new(LocalCache::new());
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute(
                        "slow",
                        Duration::from_secs(60),
                        move |_| async move {
                            let _ = started_tx.send(());
                            let _ = release_rx.await;
                            Ok(42u64)
                        },
                        CancellationToken::new(),
                    )
                    .await
            })
        };
        started_rx.await.unwrap();

        let impatient_token = CancellationToken::new();
        let impatient = {
            let cache = Arc::clone(&cache);
            let token = impatient_token.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", Duration::from_secs(60), |_| async { Ok(0u64) }, token)
                    .await
            })
        };
        let patient = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute(
                        "slow",
                        Duration::from_secs(60),
                        |_| async { Ok(0u64) },
                        CancellationToken::new(),
                    )
                    .await
            })
        };

        impatient_token.cancel();
        assert!(matches!(impatient.await.unwrap(), Err(CacheError::Cancelled)));

        release_tx.send(()).unwrap();
        assert_eq!(leader.await.unwrap().unwrap(), 42);
        assert_eq!(patient.await.unwrap().unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_invalidate_during_reads_does_not_deadlock() {
        let cache = Arc::new(LocalCache::new());

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 0..100u32 {
                    cache
                        .get_or_compute(
                            "key",
                            Duration::from_secs(60),
                            move |_| async move { Ok(i) },
                            CancellationToken::new(),
                        )
                        .await
                        .unwrap();
                }
            })
        };
        let invalidator = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for _ in 0..100 {
                    cache.invalidate("key").await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            reader.await.unwrap();
            invalidator.await.unwrap();
        })
        .await
        .expect("operations should complete without deadlock");
    }

    #[test]
    fn test_hit_rate() {
        let stats = LocalCacheStats {
            entries: 1,
            hits: 3,
            misses: 1,
        };
        assert_eq!(stats.hit_rate(), 75.0);
        assert_eq!(LocalCacheStats::default().hit_rate(), 0.0);
    }
}
