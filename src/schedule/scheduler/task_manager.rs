use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::channel::{Progress, ProgressChannel};
use crate::error::VisionError;
use crate::queue::{Delivery, TaskMessage, TaskQueue};
use crate::schedule::processors::TaskProcessor;
use crate::schedule::types::{JobOutcome, JobRequest, Task, TaskType};

/// Owns the queue, the shared progress channel and the processor registry.
pub struct TaskManager {
    queue: Arc<dyn TaskQueue>,
    channel: Arc<dyn ProgressChannel>,
    processors: HashMap<TaskType, Box<dyn TaskProcessor>>,
    completion_message: String,
    stats: Mutex<TaskStats>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub completed: u64,
    pub failed: u64,
    /// Messages that could not be turned into a task.
    pub dropped: u64,
}

impl TaskManager {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        channel: Arc<dyn ProgressChannel>,
        completion_message: String,
    ) -> Self {
        Self {
            queue,
            channel,
            processors: HashMap::new(),
            completion_message,
            stats: Mutex::new(TaskStats::default()),
        }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn register_processor(&mut self, processor: Box<dyn TaskProcessor>) {
        let task_type = processor.task_type();
        info!("Registering processor for task type: {}", task_type);
        self.processors.insert(task_type, processor);
    }

    /// Validates positional arguments and pushes the task to its queue.
    pub async fn enqueue(&self, task_type: TaskType, args: Vec<String>) -> Result<TaskMessage> {
        if !self.processors.contains_key(&task_type) {
            return Err(VisionError::NoProcessor(task_type.to_string()).into());
        }
        JobRequest::from_args(task_type, &args)?;

        let message = TaskMessage::new(task_type, args);
        self.queue.push(&message).await?;
        info!(task_id = %message.id, "Enqueued {} task", task_type);
        Ok(message)
    }

    /// Pops the next task of `task_type`, waiting up to `wait`. Messages that
    /// cannot be routed to a client are logged and dropped.
    pub async fn next_task(&self, task_type: TaskType, wait: Duration) -> Result<Option<Task>> {
        let message = match self.queue.pop(task_type, wait).await? {
            Some(Delivery::Task(message)) => message,
            Some(Delivery::Malformed { payload, reason }) => {
                error!("Dropping undecodable {} message {:?}: {}", task_type, payload, reason);
                self.stats.lock().await.dropped += 1;
                return Ok(None);
            }
            None => return Ok(None),
        };

        if message.task != task_type {
            warn!(task_id = %message.id, "Task {} found on the {} queue", message.task, task_type);
        }

        let id = message.id.clone();
        match Task::try_from(message) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                error!(task_id = %id, "Dropping malformed task: {}", e);
                self.stats.lock().await.dropped += 1;
                Ok(None)
            }
        }
    }

    /// Runs one job to the end. A job publishes the completion message when
    /// it succeeds and exactly one error message when it fails, never both.
    pub async fn run_job(&self, task: &Task) -> JobOutcome {
        let progress = Progress::new(self.channel.as_ref(), &task.request.connection_id);

        let result = match self.processors.get(&task.task_type) {
            Some(processor) => processor.process(task, &progress).await,
            None => Err(VisionError::NoProcessor(task.task_type.to_string()).into()),
        };

        match result {
            Ok(()) => {
                info!(task_id = %task.id, "Task {} completed", task.task_type);
                if let Err(e) = progress.message(self.completion_message.as_str()).await {
                    error!(task_id = %task.id, "Failed to publish completion: {}", e);
                }
                self.stats.lock().await.completed += 1;
                JobOutcome::Completed
            }
            Err(e) => {
                let trace = format!("{:?}", e);
                error!(task_id = %task.id, socketid = %task.request.connection_id, "Task {} failed: {}", task.task_type, e);
                if let Err(publish_err) = progress.message(trace.as_str()).await {
                    error!(task_id = %task.id, "Failed to publish error: {}", publish_err);
                }
                self.stats.lock().await.failed += 1;
                JobOutcome::Failed(trace)
            }
        }
    }

    pub async fn get_task_stats(&self) -> TaskStats {
        self.stats.lock().await.clone()
    }

    /// Pending messages per task type.
    pub async fn queue_lengths(&self) -> Result<BTreeMap<String, usize>> {
        let mut lengths = BTreeMap::new();
        for task_type in TaskType::ALL {
            lengths.insert(task_type.to_string(), self.queue.len(task_type).await?);
        }
        Ok(lengths)
    }
}
