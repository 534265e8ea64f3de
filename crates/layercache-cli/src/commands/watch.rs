use anyhow::{Result, bail};
use colored::Colorize;
use futures_util::StreamExt;
use layercache_core::{InvalidationMessage, InvalidationTransport};
use layercache_redis::{RedisConfig, RedisTransport, create_pool};

use crate::output::{print_error, print_field};

/// Print every invalidation published on the channel until Ctrl-C.
pub async fn watch(config: &RedisConfig) -> Result<()> {
    if !config.enabled {
        bail!("watch needs Redis: set redis.enabled = true or LAYERCACHE__REDIS__ENABLED=true");
    }

    let transport = RedisTransport::new(create_pool(config)?, &config.url, config.channel.clone())?;
    let mut frames = transport.subscribe().await?;
    print_field("Watching", transport.channel());

    loop {
        let frame = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = frames.next() => frame,
        };
        let Some(frame) = frame else {
            bail!("subscription to {} was closed", transport.channel());
        };

        match InvalidationMessage::decode(&frame) {
            Ok(message) => println!("{} {}", message.origin.to_string().dimmed(), message.key),
            Err(e) => print_error(&format!("{} ({} bytes)", e, frame.len())),
        }
    }
    Ok(())
}
