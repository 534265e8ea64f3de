//! Layered caching with stampede protection and cross-process invalidation.
//!
//! ## Tiers
//!
//! - [`LocalCache`]: in-process, one computation per key no matter how many
//!   callers ask for it concurrently.
//! - [`RemoteCache`]: values shared between processes through a
//!   [`RemoteStore`]. Degrades to plain computation when the store is down.
//! - [`CompositeCache`]: a near tier in front of a far tier.
//! - [`InvalidationPropagator`]: broadcasts invalidations to the other
//!   processes over an [`InvalidationTransport`] and applies theirs.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use layercache_core::{Cache, CompositeCache, InvalidationPropagator, LocalCache, MemoryStore,
//!     MemoryTransport, RemoteCache};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), layercache_core::CacheError> {
//! let cache = Arc::new(CompositeCache::new(
//!     LocalCache::new(),
//!     RemoteCache::new(MemoryStore::new()).with_prefix("app:"),
//! ));
//! let transport = Arc::new(MemoryTransport::new("cache-invalidation")?);
//! let cache = InvalidationPropagator::start(cache, transport).await?;
//!
//! let name: String = cache
//!     .get_or_compute(
//!         "user:1:name",
//!         Duration::from_secs(300),
//!         |_| async { Ok("Ada".to_string()) },
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! cache.invalidate("user:1:name").await?;
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod composite;
pub mod entry;
pub mod error;
pub mod local;
pub mod message;
pub mod passthrough;
pub mod propagator;
pub mod remote;
pub mod serializer;
pub mod transport;

pub use cache::{Cache, CacheValue, NO_EXPIRATION};
pub use clock::{Clock, ManualClock, SystemClock};
pub use composite::CompositeCache;
pub use entry::CoalescingEntry;
pub use error::CacheError;
pub use local::{LocalCache, LocalCacheStats};
pub use message::InvalidationMessage;
pub use passthrough::PassThroughCache;
pub use propagator::{InvalidationPropagator, ReconnectPolicy};
pub use remote::{MemoryStore, RemoteCache, RemoteStore};
pub use serializer::{Compressed, JsonSerializer, MessagePackSerializer, ValueSerializer};
pub use transport::{InvalidationTransport, MemoryTransport, MessageStream, validate_channel};
