use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Delivery, TaskMessage, TaskQueue};
use crate::schedule::types::TaskType;

/// Process-local queue, for tests and single-process setups.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    lanes: Mutex<HashMap<TaskType, VecDeque<TaskMessage>>>,
    notify: Notify,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn push(&self, message: &TaskMessage) -> Result<()> {
        self.lanes
            .lock()
            .await
            .entry(message.task)
            .or_default()
            .push_back(message.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, task_type: TaskType, timeout: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self
                .lanes
                .lock()
                .await
                .get_mut(&task_type)
                .and_then(|lane| lane.pop_front())
            {
                return Ok(Some(Delivery::Task(message)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // a wakeup may belong to another lane, so always re-check
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn len(&self, task_type: TaskType) -> Result<usize> {
        Ok(self
            .lanes
            .lock()
            .await
            .get(&task_type)
            .map_or(0, |lane| lane.len()))
    }
}
