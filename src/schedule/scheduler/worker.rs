use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};
use anyhow::Result;

use crate::schedule::types::{JobOutcome, TaskType};
use super::TaskManager;

pub struct TaskWorker {
    // task manager
    task_manager: Arc<TaskManager>,
    // task type. e.g. Classify
    task_type: TaskType,
    // how long a single pop blocks on the queue
    wait: Duration,
}

impl TaskWorker {
    pub fn new(task_manager: Arc<TaskManager>, task_type: TaskType) -> Self {
        Self {
            task_manager,
            task_type,
            wait: Duration::from_secs(1),
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub async fn run(&self) {
        info!("Worker for {} tasks started", self.task_type);
        loop {
            match self.process_next_task().await {
                // pop already blocked for `wait`, go straight back
                Ok(_) => continue,
                Err(e) => {
                    error!("Error fetching {} task: {}", self.task_type, e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Runs at most one job. Returns whether a job was run.
    pub async fn process_next_task(&self) -> Result<bool> {
        let task = match self.task_manager.next_task(self.task_type, self.wait).await? {
            Some(task) => task,
            None => return Ok(false),
        };

        info!("Processing {} task: {}", self.task_type, task.id);

        match self.task_manager.run_job(&task).await {
            JobOutcome::Completed => info!("Task {} done", task.id),
            JobOutcome::Failed(_) => error!("Task {} failed", task.id),
        }
        Ok(true)
    }
}
