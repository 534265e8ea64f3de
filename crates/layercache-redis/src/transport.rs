//! Redis pub/sub invalidation channel.

use async_trait::async_trait;
use deadpool_redis::Pool;
use futures_util::StreamExt;
use layercache_core::{CacheError, InvalidationTransport, MessageStream, validate_channel};
use redis::AsyncCommands;

/// Publishes through the shared pool; each subscription gets a dedicated
/// pub/sub connection, since a subscribed connection cannot run commands.
#[derive(Clone)]
pub struct RedisTransport {
    pool: Pool,
    client: redis::Client,
    channel: String,
}

impl RedisTransport {
    pub fn new(pool: Pool, url: &str, channel: impl Into<String>) -> Result<Self, CacheError> {
        let channel = channel.into();
        validate_channel(&channel)?;
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::configuration(format!("failed to create Redis client: {e}")))?;
        Ok(Self {
            pool,
            client,
            channel,
        })
    }
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport")
            .field("channel", &self.channel)
            .finish()
    }
}

#[async_trait]
impl InvalidationTransport for RedisTransport {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::unavailable(format!("failed to get Redis connection: {e}")))?;

        conn.publish::<_, _, ()>(&self.channel, payload)
            .await
            .map_err(|e| CacheError::unavailable(format!("failed to publish invalidation: {e}")))
    }

    async fn subscribe(&self) -> Result<MessageStream, CacheError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            CacheError::unavailable(format!("failed to get pub/sub connection: {e}"))
        })?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| CacheError::unavailable(format!("failed to subscribe: {e}")))?;

        let frames = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());
        Ok(frames.boxed())
    }
}
