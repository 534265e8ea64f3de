use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, CacheValue};
use crate::error::CacheError;

/// A cache that never stores anything.
///
/// Every call runs `compute` with the caller's token and `invalidate` does
/// nothing. Handy for switching caching off without changing call sites.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughCache;

#[async_trait]
impl Cache for PassThroughCache {
    async fn get_or_compute<V, F, Fut>(
        &self,
        _key: &str,
        _duration: Duration,
        compute: F,
        cancel: CancellationToken,
    ) -> Result<V, CacheError>
    where
        V: CacheValue,
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<V, CacheError>> + Send,
    {
        compute(cancel).await
    }

    async fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_always_computes() {
        let cache = PassThroughCache;
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for expected in 1..=3 {
            let value: usize = cache
                .get_or_compute(
                    "k",
                    Duration::from_secs(60),
                    move |_| async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn test_passes_caller_token_to_compute() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let observed: bool = PassThroughCache
            .get_or_compute(
                "k",
                Duration::from_secs(60),
                |token| async move { Ok(token.is_cancelled()) },
                cancel,
            )
            .await
            .unwrap();

        assert!(observed);
    }
}
