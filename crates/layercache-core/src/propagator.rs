//! Cross-process invalidation.
//!
//! ## How It Works
//!
//! ```text
//! Process A: propagator.invalidate("key1")
//!   ↓ local invalidation, then
//! Channel:   PUBLISH <A's origin id><"key1">
//!   ↓
//! Process A: receives own frame → ignored
//! Process B: receives frame     → inner.invalidate("key1"), no re-publish
//! ```
//!
//! Delivery is best effort: a process that is disconnected while a frame is
//! published keeps serving its stale value until it expires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{Cache, CacheValue};
use crate::error::CacheError;
use crate::message::InvalidationMessage;
use crate::transport::{InvalidationTransport, MessageStream};

/// Delay between attempts to re-open a lost subscription.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Wraps a cache so that its invalidations reach every other process on the
/// same channel, and theirs reach it.
///
/// The origin identifier is generated once per propagator; frames carrying
/// it are this instance's own echoes and are discarded on receipt.
pub struct InvalidationPropagator<C, T> {
    inner: Arc<C>,
    transport: Arc<T>,
    origin: Uuid,
    shutdown: CancellationToken,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl<C, T> InvalidationPropagator<C, T>
where
    C: Cache + 'static,
    T: InvalidationTransport + 'static,
{
    /// Subscribe to the channel and start applying remote invalidations.
    ///
    /// The subscription is open when this returns, so anything published
    /// afterwards is seen. Fails if the channel cannot be subscribed to.
    pub async fn start(inner: Arc<C>, transport: Arc<T>) -> Result<Self, CacheError> {
        Self::start_with(inner, transport, ReconnectPolicy::default()).await
    }

    pub async fn start_with(
        inner: Arc<C>,
        transport: Arc<T>,
        policy: ReconnectPolicy,
    ) -> Result<Self, CacheError> {
        let origin = Uuid::new_v4();
        let stream = transport.subscribe().await?;
        info!(channel = %transport.channel(), origin = %origin, "Subscribed to invalidation channel");

        let shutdown = CancellationToken::new();
        let receiver = Receiver {
            inner: Arc::clone(&inner),
            transport: Arc::clone(&transport),
            origin,
            policy,
        };
        let handle = tokio::spawn(receiver.run(stream, shutdown.clone()));

        Ok(Self {
            inner,
            transport,
            origin,
            shutdown,
            receiver: Mutex::new(Some(handle)),
        })
    }
}

impl<C, T> InvalidationPropagator<C, T> {
    /// Identifier stamped on every frame this instance publishes.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }

    /// Stop the receive loop and wait for it to finish.
    ///
    /// A frame being applied when this is called is applied completely first.
    /// Concurrent callers all wait for the loop to end; later calls return
    /// immediately.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        // Held across the join so overlapping callers wait too.
        let mut receiver = self.receiver.lock().await;
        if let Some(handle) = receiver.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "invalidation receiver terminated abnormally");
            }
        }
    }
}

impl<C, T> Drop for InvalidationPropagator<C, T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<C, T: InvalidationTransport> std::fmt::Debug for InvalidationPropagator<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationPropagator")
            .field("channel", &self.transport.channel())
            .field("origin", &self.origin)
            .finish()
    }
}

#[async_trait]
impl<C, T> Cache for InvalidationPropagator<C, T>
where
    C: Cache + 'static,
    T: InvalidationTransport + 'static,
{
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
        self.inner
            .get_or_compute(key, duration, compute, cancel)
            .await
    }

    /// Invalidate locally, then tell the other processes.
    ///
    /// Failing to publish is logged and otherwise ignored: the local
    /// invalidation has already happened.
    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.inner.invalidate(key).await?;

        let frame = InvalidationMessage::new(self.origin, key).encode();
        match self.transport.publish(frame).await {
            Ok(()) => debug!(key = %key, "published cache invalidation"),
            Err(e) => warn!(
                key = %key,
                channel = %self.transport.channel(),
                error = %e,
                "failed to publish cache invalidation, peers keep their copy until it expires"
            ),
        }
        Ok(())
    }
}

/// State owned by the background receive loop.
struct Receiver<C, T> {
    inner: Arc<C>,
    transport: Arc<T>,
    origin: Uuid,
    policy: ReconnectPolicy,
}

impl<C: Cache, T: InvalidationTransport> Receiver<C, T> {
    async fn run(self, mut stream: MessageStream, shutdown: CancellationToken) {
        loop {
            // Shutdown is only observed between frames.
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(frame) => self.apply(&frame).await,
                None => match self.resubscribe(&shutdown).await {
                    Some(fresh) => stream = fresh,
                    None => break,
                },
            }
        }
        info!(channel = %self.transport.channel(), "Invalidation receiver stopped");
    }

    async fn apply(&self, frame: &[u8]) {
        let message = match InvalidationMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "discarding invalidation message");
                return;
            }
        };

        if message.origin == self.origin {
            debug!(key = %message.key, "ignoring own invalidation message");
            return;
        }

        debug!(key = %message.key, origin = %message.origin, "received cache invalidation");
        if let Err(e) = self.inner.invalidate(&message.key).await {
            warn!(key = %message.key, error = %e, "failed to apply remote invalidation");
        }
    }

    /// Re-open the subscription with exponential backoff. `None` on shutdown.
    async fn resubscribe(&self, shutdown: &CancellationToken) -> Option<MessageStream> {
        let mut backoff = self.policy.initial_backoff;
        loop {
            error!(
                channel = %self.transport.channel(),
                backoff = ?backoff,
                "Invalidation subscription lost, resubscribing"
            );
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }

            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                attempt = self.transport.subscribe() => attempt,
            };
            match attempt {
                Ok(stream) => {
                    info!(channel = %self.transport.channel(), "Resubscribed to invalidation channel");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(error = %e, "resubscribe failed");
                    backoff = next_backoff(backoff, self.policy.max_backoff);
                }
            }
        }
    }
}

/// Double the delay, capped at `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
