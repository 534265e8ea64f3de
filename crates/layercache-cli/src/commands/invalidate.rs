use anyhow::Result;
use layercache_core::Cache;
use layercache_redis::CacheBackend;

use crate::output::{print_success, print_warning};

pub async fn invalidate(backend: CacheBackend, key: &str) -> Result<()> {
    let result = backend.invalidate(key).await;
    backend.shutdown().await;
    result?;

    match backend {
        CacheBackend::Distributed(_) => {
            print_success(&format!("Invalidated {key} and notified other processes"));
        }
        CacheBackend::Local(_) => {
            print_success(&format!("Invalidated {key}"));
            print_warning("Redis is not in use: only this process's (empty) cache was affected");
        }
    }
    Ok(())
}
