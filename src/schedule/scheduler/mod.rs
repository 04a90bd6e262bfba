mod task_manager;
mod worker;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::sync::Mutex;
use tracing::info;

pub use task_manager::{TaskManager, TaskStats};
pub use worker::TaskWorker;
use crate::schedule::types::TaskType;

pub struct TaskScheduler {
    task_manager: Arc<TaskManager>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(task_manager: Arc<TaskManager>) -> Self {
        Self {
            task_manager,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    pub async fn spawn_worker(&self, task_type: TaskType) {
        let worker = TaskWorker::new(self.task_manager.clone(), task_type);
        let handle = tokio::spawn(async move {
            worker.run().await;
        });
        self.workers.lock().await.push(handle);
    }

    /// Aborts the worker loops. A job that is mid-way is cut off at its next
    /// await point.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        info!("Stopping {} workers", workers.len());
        for worker in workers.drain(..) {
            worker.abort();
        }
    }
}
