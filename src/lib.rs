pub mod channel;
pub mod classifier;
pub mod error;
pub mod queue;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod vision;
pub mod web;

use std::{env, path::PathBuf, sync::Arc};
use once_cell::sync::Lazy;
use schedule::TaskManager;

pub use error::VisionError;

pub struct AppContext {
    pub task_manager: Arc<TaskManager>,
}

const VT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const VT_CHANNEL: &str = "chat";
const VT_QUEUE_PREFIX: &str = "vision_tasks";
const VT_MODEL_DIR: &str = "./models";
const VT_MODEL_FILE: &str = "caffenet.onnx";
const VT_MEAN_FILE: &str = "ilsvrc_2012_mean.npy";
const VT_LABELS_PATH: &str = "./models/synset_words.txt";
const VT_LOG_DIR: &str = "./logs";
const VT_HTTP_ADDR: &str = "127.0.0.1:7200";
const VT_COMPLETION_MESSAGE: &str = "Thank you for using CloudCV";

// 进程环境变量优先，其次是 .env 文件，最后是默认值
fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) => value,
        Err(_) => dotenv::var(key).unwrap_or_else(|_| default.to_string()),
    }
}

pub static REDIS_URL: Lazy<String> = Lazy::new(|| env_or("VT_REDIS_URL", VT_REDIS_URL));
pub static CHANNEL: Lazy<String> = Lazy::new(|| env_or("VT_CHANNEL", VT_CHANNEL));
pub static QUEUE_PREFIX: Lazy<String> = Lazy::new(|| env_or("VT_QUEUE_PREFIX", VT_QUEUE_PREFIX));
pub static MODEL_DIR: Lazy<String> = Lazy::new(|| env_or("VT_MODEL_DIR", VT_MODEL_DIR));
pub static MODEL_FILE: Lazy<String> = Lazy::new(|| env_or("VT_MODEL_FILE", VT_MODEL_FILE));
pub static MEAN_FILE: Lazy<String> = Lazy::new(|| env_or("VT_MEAN_FILE", VT_MEAN_FILE));
pub static LABELS_PATH: Lazy<String> = Lazy::new(|| env_or("VT_LABELS_PATH", VT_LABELS_PATH));
pub static LOG_DIR: Lazy<String> = Lazy::new(|| env_or("VT_LOG_DIR", VT_LOG_DIR));
pub static HTTP_ADDR: Lazy<String> = Lazy::new(|| env_or("VT_HTTP_ADDR", VT_HTTP_ADDR));
pub static COMPLETION_MESSAGE: Lazy<String> =
    Lazy::new(|| env_or("VT_COMPLETION_MESSAGE", VT_COMPLETION_MESSAGE));

/// Snapshot of the settings a job needs, so processors never read globals.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub model_path: PathBuf,
    pub mean_path: PathBuf,
    pub labels_path: PathBuf,
    pub completion_message: String,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let model_dir = PathBuf::from(MODEL_DIR.as_str());
        Self {
            model_path: model_dir.join(MODEL_FILE.as_str()),
            mean_path: model_dir.join(MEAN_FILE.as_str()),
            labels_path: PathBuf::from(LABELS_PATH.as_str()),
            completion_message: COMPLETION_MESSAGE.clone(),
        }
    }
}

pub fn init_env() {
    dotenv::dotenv().ok();

    // 确保日志目录存在
    std::fs::create_dir_all(LOG_DIR.as_str()).unwrap_or_else(|e| {
        eprintln!("Failed to create log directory: {}", e);
    });
}
