use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::types::TaskType;

pub mod broker;
pub mod memory;

pub use broker::RedisTaskQueue;
pub use memory::InMemoryTaskQueue;

/// A queued task as it travels through the broker. `args` are positional and
/// their order depends on `task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub task: TaskType,
    pub args: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(task: TaskType, args: Vec<String>) -> Self {
        Self {
            id: format!("task-{}", Uuid::new_v4()),
            task,
            args,
            enqueued_at: Utc::now(),
        }
    }
}

/// One popped entry. A payload that does not decode to a [`TaskMessage`]
/// comes back as `Malformed` so the caller can account for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Task(TaskMessage),
    Malformed { payload: String, reason: String },
}

impl Delivery {
    pub fn decode(payload: String) -> Self {
        match serde_json::from_str(&payload) {
            Ok(message) => Delivery::Task(message),
            Err(e) => Delivery::Malformed {
                payload,
                reason: e.to_string(),
            },
        }
    }
}

/// FIFO queue with one lane per task type. A popped message is gone; there
/// is no acknowledgement or redelivery.
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    async fn push(&self, message: &TaskMessage) -> Result<()>;

    /// Waits up to `timeout` for the next message of `task_type`.
    async fn pop(&self, task_type: TaskType, timeout: Duration) -> Result<Option<Delivery>>;

    async fn len(&self, task_type: TaskType) -> Result<usize>;
}
