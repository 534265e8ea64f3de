//! Two-level cache hierarchy.
//!
//! ```text
//! get_or_compute → near ──miss──▶ far ──miss──▶ compute
//! invalidate     → far, then near
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, CacheValue};
use crate::error::CacheError;

/// Composes a fast `near` tier in front of a slower, usually shared `far` tier.
///
/// A near miss asks the far tier, which may in turn run `compute`; the result
/// is stored in both. The near tier's own coalescing keeps concurrent near
/// misses down to one far lookup per process.
#[derive(Debug)]
pub struct CompositeCache<N, F> {
    near: N,
    far: F,
}

impl<N: Cache, F: Cache> CompositeCache<N, F> {
    pub fn new(near: N, far: F) -> Self {
        Self { near, far }
    }

    pub fn near(&self) -> &N {
        &self.near
    }

    pub fn far(&self) -> &F {
        &self.far
    }
}

#[async_trait]
impl<N: Cache, F: Cache> Cache for CompositeCache<N, F> {
    async fn get_or_compute<V, C, Fut>(
        &self,
        key: &str,
        duration: Duration,
        compute: C,
        cancel: CancellationToken,
    ) -> Result<V, CacheError>
    where
        V: CacheValue,
        C: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<V, CacheError>> + Send,
    {
        let far = &self.far;
        self.near
            .get_or_compute(
                key,
                duration,
                move |token| async move { far.get_or_compute(key, duration, compute, token).await },
                cancel,
            )
            .await
    }

    /// Invalidates the far tier first so that a near miss racing with this
    /// call cannot repopulate from a value that is about to be removed.
    ///
    /// The near tier is invalidated even when the far tier fails; the far
    /// error is returned afterwards.
    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let far = self.far.invalidate(key).await;
        if let Err(e) = &far {
            tracing::warn!(key = %key, error = %e, "far cache invalidation failed");
        }
        self.near.invalidate(key).await?;
        far
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCache;
    use crate::passthrough::PassThroughCache;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every call it receives into a shared journal.
    struct Recording<C> {
        name: &'static str,
        inner: C,
        journal: Arc<Mutex<Vec<String>>>,
        fail_invalidate: bool,
    }

    impl<C> Recording<C> {
        fn new(name: &'static str, inner: C, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                inner,
                journal: Arc::clone(journal),
                fail_invalidate: false,
            }
        }
    }

    #[async_trait]
    impl<C: Cache> Cache for Recording<C> {
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
            self.journal.lock().push(format!("{}.get({key})", self.name));
            self.inner.get_or_compute(key, duration, compute, cancel).await
        }

        async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
            self.journal
                .lock()
                .push(format!("{}.invalidate({key})", self.name));
            if self.fail_invalidate {
                return Err(CacheError::unavailable("far tier down"));
            }
            self.inner.invalidate(key).await
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_invalidates_far_before_near() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let cache = CompositeCache::new(
            Recording::new("near", PassThroughCache, &journal),
            Recording::new("far", PassThroughCache, &journal),
        );

        cache.invalidate("k").await.unwrap();

        assert_eq!(*journal.lock(), vec!["far.invalidate(k)", "near.invalidate(k)"]);
    }

    #[tokio::test]
    async fn test_near_is_invalidated_even_if_far_fails() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut far = Recording::new("far", PassThroughCache, &journal);
        far.fail_invalidate = true;
        let cache = CompositeCache::new(Recording::new("near", PassThroughCache, &journal), far);

        let result = cache.invalidate("k").await;

        assert!(matches!(result, Err(CacheError::TransportUnavailable(_))));
        assert_eq!(*journal.lock(), vec!["far.invalidate(k)", "near.invalidate(k)"]);
    }

    #[tokio::test]
    async fn test_reads_cascade_near_then_far() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let cache = CompositeCache::new(
            Recording::new("near", LocalCache::new(), &journal),
            Recording::new("far", LocalCache::new(), &journal),
        );

        let value: u32 = cache
            .get_or_compute("k", MINUTE, |_| async { Ok(1) }, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(*journal.lock(), vec!["near.get(k)", "far.get(k)"]);

        // A near hit never reaches the far tier.
        journal.lock().clear();
        let value: u32 = cache
            .get_or_compute("k", MINUTE, |_| async { Ok(2) }, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(*journal.lock(), vec!["near.get(k)"]);
    }

    #[tokio::test]
    async fn test_invalidation_clears_both_levels() {
        let cache = CompositeCache::new(LocalCache::new(), LocalCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        for expected_calls in [1, 2] {
            let calls_in = Arc::clone(&calls);
            let _: u32 = cache
                .get_or_compute(
                    "k",
                    MINUTE,
                    move |_| async move { Ok(calls_in.fetch_add(1, Ordering::SeqCst) as u32) },
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
            cache.invalidate("k").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_near_miss_after_near_only_invalidation_reads_far() {
        let cache = CompositeCache::new(LocalCache::new(), LocalCache::new());

        let _: u32 = cache
            .get_or_compute("k", MINUTE, |_| async { Ok(1) }, CancellationToken::new())
            .await
            .unwrap();
        // Simulates a remote invalidation that only reached this process's near tier.
        cache.near().invalidate("k").await.unwrap();

        let value: u32 = cache
            .get_or_compute("k", MINUTE, |_| async { Ok(2) }, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_near_misses_reach_far_once() {
        let far_lookups = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));
        let cache = Arc::new(CompositeCache::new(
            LocalCache::new(),
            Recording::new("far", PassThroughCache, &journal),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let far_lookups = Arc::clone(&far_lookups);
                tokio::spawn(async move {
                    cache
                        .get_or_compute(
                            "hot",
                            MINUTE,
                            move |_| async move {
                                far_lookups.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok(String::from("v"))
                            },
                            CancellationToken::new(),
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "v");
        }
        assert_eq!(far_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(journal.lock().len(), 1);
    }
}
