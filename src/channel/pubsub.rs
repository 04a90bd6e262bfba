use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use super::{ChannelMessage, ProgressChannel};

/// Publishes JSON messages on a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisChannel {
    conn: MultiplexedConnection,
    channel: String,
}

impl RedisChannel {
    pub async fn connect(url: &str, channel: &str) -> Result<Self> {
        info!("Connecting progress channel {} at {}", channel, url);
        let client = redis::Client::open(url)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("failed to connect to redis at {}", url))?;
        Ok(Self {
            conn,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl ProgressChannel for RedisChannel {
    async fn publish(&self, message: &ChannelMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        debug!(
            socketid = message.socketid(),
            receivers, "Published to {}", self.channel
        );
        Ok(())
    }
}
