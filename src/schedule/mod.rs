use std::sync::Arc;

pub mod types;
pub mod processors;
pub mod scheduler;
#[cfg(test)]
mod tests;

// 重导出主要类型
pub use types::{JobOutcome, JobRequest, Task, TaskType};

// 重导出处理器接口
pub use processors::{ClassifyProcessor, ExtractFeaturesProcessor, TaskProcessor};

// 重导出调度器接口
pub use scheduler::{TaskManager, TaskScheduler, TaskStats, TaskWorker};

use crate::channel::ProgressChannel;
use crate::queue::TaskQueue;

// 提供便捷的构建方法
pub fn create_scheduler(
    queue: Arc<dyn TaskQueue>,
    channel: Arc<dyn ProgressChannel>,
    completion_message: String,
    processors: Vec<Box<dyn TaskProcessor>>,
) -> TaskScheduler {
    let mut task_manager = TaskManager::new(queue, channel, completion_message);

    for processor in processors {
        task_manager.register_processor(processor);
    }

    TaskScheduler::new(Arc::new(task_manager))
}
