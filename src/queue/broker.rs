use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Delivery, TaskMessage, TaskQueue};
use crate::schedule::types::TaskType;

/// Redis lists as the broker: `LPUSH` to enqueue, `BRPOP` to dequeue.
///
/// `BRPOP` holds its connection until it returns, so every pop runs on a
/// connection of its own. Pushes and lengths share one multiplexed handle.
pub struct RedisTaskQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
    // 空闲的阻塞连接，每个并发 pop 各占一个
    blocking: Mutex<Vec<MultiplexedConnection>>,
    prefix: String,
}

impl RedisTaskQueue {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        info!("Connecting task queue {} at {}", prefix, url);
        let client = redis::Client::open(url)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("failed to connect to redis at {}", url))?;
        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
            prefix: prefix.to_string(),
        })
    }

    pub fn key(&self, task_type: TaskType) -> String {
        format!("{}:{}", self.prefix, task_type.as_str())
    }

    async fn blocking_connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        debug!("Opening blocking connection for {}", self.prefix);
        Ok(self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("failed to open blocking redis connection")?)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, message: &TaskMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        let depth: i64 = conn.lpush(self.key(message.task), payload).await?;
        debug!(task_id = %message.id, depth, "Enqueued {} task", message.task);
        Ok(())
    }

    async fn pop(&self, task_type: TaskType, timeout: Duration) -> Result<Option<Delivery>> {
        let mut conn = self.blocking_connection().await?;
        // 出错的连接直接丢弃，下次重新建立
        let popped: Option<(String, String)> =
            conn.brpop(self.key(task_type), timeout.as_secs_f64()).await?;
        self.blocking.lock().await.push(conn);

        Ok(popped.map(|(_, payload)| Delivery::decode(payload)))
    }

    async fn len(&self, task_type: TaskType) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(self.key(task_type)).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use uuid::Uuid;

    // 需要本地 redis，连不上时跳过
    async fn connect() -> Option<RedisTaskQueue> {
        let url = std::env::var("VT_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let prefix = format!("vision_tasks_test_{}", Uuid::new_v4());
        match RedisTaskQueue::connect(&url, &prefix).await {
            Ok(queue) => Some(queue),
            Err(e) => {
                eprintln!("skipping, redis unavailable: {}", e);
                None
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_pop_does_not_stall_other_lanes() {
        let Some(queue) = connect().await else { return };
        let queue = std::sync::Arc::new(queue);

        let idle = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(TaskType::Classify, Duration::from_secs(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let message = TaskMessage::new(
            TaskType::ExtractFeatures,
            vec!["/in".into(), "/out".into(), "sock".into()],
        );
        queue.push(&message).await.unwrap();
        assert_eq!(queue.len(TaskType::ExtractFeatures).await.unwrap(), 1);
        let popped = queue
            .pop(TaskType::ExtractFeatures, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(popped, Some(Delivery::Task(message)));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(idle.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_delivered_as_malformed() {
        let Some(queue) = connect().await else { return };
        let mut conn = queue.conn.clone();
        let _: i64 = conn.lpush(queue.key(TaskType::Classify), "{oops").await.unwrap();

        let popped = queue.pop(TaskType::Classify, Duration::from_secs(1)).await.unwrap();
        assert!(matches!(popped, Some(Delivery::Malformed { .. })));
    }
}
