use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use layercache_core::Cache;
use layercache_redis::{CacheBackend, CacheSettings};
use tokio_util::sync::CancellationToken;

use crate::cli::StampedeArgs;
use crate::output::{print_field, print_success, print_warning};

/// Outcome of one stampede run.
#[derive(Debug)]
pub struct StampedeReport {
    pub callers: usize,
    pub computations: usize,
    pub elapsed: Duration,
}

/// Fire `callers` concurrent reads of one freshly invalidated key.
pub async fn run_stampede<C: Cache + 'static>(
    cache: Arc<C>,
    key: &str,
    callers: usize,
    ttl: Duration,
    delay: Duration,
) -> Result<StampedeReport> {
    cache.invalidate(key).await?;

    let computations = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let handles: Vec<_> = (0..callers)
        .map(|caller| {
            let cache = Arc::clone(&cache);
            let computations = Arc::clone(&computations);
            let key = key.to_string();
            tokio::spawn(async move {
                cache
                    .get_or_compute(
                        &key,
                        ttl,
                        move |token| async move {
                            computations.fetch_add(1, Ordering::SeqCst);
                            tokio::select! {
                                _ = token.cancelled() => Err(layercache_core::CacheError::Cancelled),
                                _ = tokio::time::sleep(delay) => Ok(format!("computed by caller {caller}")),
                            }
                        },
                        CancellationToken::new(),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.context("caller task panicked")??;
    }

    Ok(StampedeReport {
        callers,
        computations: computations.load(Ordering::SeqCst),
        elapsed: started.elapsed(),
    })
}

pub async fn stampede(backend: CacheBackend, settings: &CacheSettings, args: &StampedeArgs) -> Result<()> {
    let backend = Arc::new(backend);
    let report = run_stampede(
        Arc::clone(&backend),
        &args.key,
        args.callers,
        settings.local.default_ttl(),
        Duration::from_millis(args.delay_ms),
    )
    .await;
    backend.shutdown().await;
    let report = report?;

    print_field("Mode", backend.mode());
    print_field("Key", &args.key);
    print_field("Callers", report.callers);
    print_field("Computations", report.computations);
    print_field("Elapsed", format!("{:?}", report.elapsed));

    if report.computations <= 1 {
        print_success("all callers shared a single computation");
    } else {
        print_warning(&format!(
            "{} computations ran; another process may have invalidated the key mid-run",
            report.computations
        ));
    }
    Ok(())
}
