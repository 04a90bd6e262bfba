pub mod classify;
pub mod extract_features;

use async_trait::async_trait;
use anyhow::Result;

use crate::channel::Progress;
use crate::schedule::types::{Task, TaskType};

pub use classify::ClassifyProcessor;
pub use extract_features::ExtractFeaturesProcessor;

/// One job body. `process` publishes results through `progress` as it goes;
/// the completion or failure message is left to the task manager.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn task_type(&self) -> TaskType;
    async fn process(&self, task: &Task, progress: &Progress<'_>) -> Result<()>;
}
