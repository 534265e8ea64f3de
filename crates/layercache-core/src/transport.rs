//! Publish/subscribe channel carrying invalidation frames between processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::CacheError;

/// Raw frames received from a subscription. Dropping it unsubscribes.
pub type MessageStream = BoxStream<'static, Vec<u8>>;

/// A broadcast channel shared by every process using the same cache.
///
/// Transports must deliver a process's own publications back to it; telling
/// them apart is the receiver's job.
#[async_trait]
pub trait InvalidationTransport: Send + Sync {
    /// Name of the channel this transport publishes to and listens on.
    fn channel(&self) -> &str;

    async fn publish(&self, payload: Vec<u8>) -> Result<(), CacheError>;

    /// Open a subscription. The stream ends when the connection is lost.
    async fn subscribe(&self) -> Result<MessageStream, CacheError>;
}

#[async_trait]
impl<T: InvalidationTransport> InvalidationTransport for Arc<T> {
    fn channel(&self) -> &str {
        self.as_ref().channel()
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<(), CacheError> {
        self.as_ref().publish(payload).await
    }

    async fn subscribe(&self) -> Result<MessageStream, CacheError> {
        self.as_ref().subscribe().await
    }
}

/// Reject channel names that cannot address anything.
pub fn validate_channel(channel: &str) -> Result<(), CacheError> {
    if channel.trim().is_empty() {
        return Err(CacheError::configuration(
            "invalidation channel name must not be empty",
        ));
    }
    Ok(())
}

const BUS_CAPACITY: usize = 1024;

/// In-process transport built on a tokio broadcast channel.
///
/// Clones share the same bus, so several propagators in one process can
/// stand in for several processes on a real channel.
#[derive(Clone)]
pub struct MemoryTransport {
    bus: Arc<MemoryBus>,
}

struct MemoryBus {
    channel: String,
    sender: RwLock<broadcast::Sender<Vec<u8>>>,
    available: AtomicBool,
    published: AtomicU64,
}

impl MemoryTransport {
    pub fn new(channel: impl Into<String>) -> Result<Self, CacheError> {
        let channel = channel.into();
        validate_channel(&channel)?;
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Ok(Self {
            bus: Arc::new(MemoryBus {
                channel,
                sender: RwLock::new(sender),
                available: AtomicBool::new(true),
                published: AtomicU64::new(0),
            }),
        })
    }

    /// Simulate the channel going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.bus.available.store(available, Ordering::SeqCst);
    }

    /// End every open subscription, as a dropped connection would.
    pub fn disconnect_all(&self) {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        *self.bus.sender.write() = sender;
    }

    /// Number of frames successfully published.
    pub fn published(&self) -> u64 {
        self.bus.published.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.bus.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::unavailable(format!(
                "channel {} is unreachable",
                self.bus.channel
            )))
        }
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("channel", &self.bus.channel)
            .finish()
    }
}

#[async_trait]
impl InvalidationTransport for MemoryTransport {
    fn channel(&self) -> &str {
        &self.bus.channel
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<(), CacheError> {
        self.ensure_available()?;
        // No subscribers is not an error: nobody needed the message.
        let _ = self.bus.sender.read().send(payload);
        self.bus.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self) -> Result<MessageStream, CacheError> {
        self.ensure_available()?;
        let receiver = self.bus.sender.read().subscribe();
        let channel = self.bus.channel.clone();

        let stream = futures_util::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(frame) => return Some((frame, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                channel = %channel,
                                skipped,
                                "invalidation subscriber lagged, messages lost"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
