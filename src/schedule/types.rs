use std::fmt::Display;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VisionError;
use crate::queue::TaskMessage;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Classify,
    ExtractFeatures,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::Classify, TaskType::ExtractFeatures];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classify => "classify",
            TaskType::ExtractFeatures => "extract_features",
        }
    }

    /// Number of positional arguments the task is enqueued with.
    pub fn arity(&self) -> usize {
        3
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a job works on and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_path: PathBuf,
    pub connection_id: String,
    /// A file path for single-file sources, a directory otherwise.
    pub result_destination: PathBuf,
}

impl JobRequest {
    /// Reads the positional arguments of a queued task. Classification takes
    /// `(source, connection_id, destination)`, feature extraction takes
    /// `(source, destination, connection_id)`.
    pub fn from_args(task_type: TaskType, args: &[String]) -> Result<Self, VisionError> {
        if args.len() != task_type.arity() {
            return Err(VisionError::BadArguments {
                task: task_type.to_string(),
                expected: task_type.arity(),
                got: args.len(),
            });
        }

        let (source, connection_id, destination) = match task_type {
            TaskType::Classify => (&args[0], &args[1], &args[2]),
            TaskType::ExtractFeatures => (&args[0], &args[2], &args[1]),
        };

        Ok(Self {
            source_path: PathBuf::from(source),
            connection_id: connection_id.clone(),
            result_destination: PathBuf::from(destination),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub request: JobRequest,
    pub enqueued_at: DateTime<Utc>,
}

impl TryFrom<TaskMessage> for Task {
    type Error = VisionError;

    fn try_from(message: TaskMessage) -> Result<Self, Self::Error> {
        let request = JobRequest::from_args(message.task, &message.args)?;
        Ok(Task {
            id: message.id,
            task_type: message.task,
            request,
            enqueued_at: message.enqueued_at,
        })
    }
}

/// How a job ended, as seen by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
}
