use axum::{
    routing::{get, post},
    Router,
    extract::{State, Json},
    response::IntoResponse,
    http::StatusCode,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::VisionError;
use crate::schedule::scheduler::{TaskManager, TaskStats};
use crate::schedule::types::TaskType;

pub fn tasks_router(task_manager: Arc<TaskManager>) -> Router {
    Router::new()
        .route("/classify", post(enqueue_classify))
        .route("/extract_features", post(enqueue_extract_features))
        .route("/stats", get(get_task_stats))
        .with_state(task_manager)
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Positional job arguments, in the order the task type expects.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EnqueuedTask {
    task_id: String,
    task: TaskType,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    stats: TaskStats,
    queued: BTreeMap<String, usize>,
}

async fn enqueue(task_manager: &TaskManager, task_type: TaskType, args: Vec<String>) -> impl IntoResponse {
    match task_manager.enqueue(task_type, args).await {
        Ok(message) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(EnqueuedTask {
                task_id: message.id,
                task: message.task,
            })),
        ),
        Err(e) => {
            let status = match e.downcast_ref::<VisionError>() {
                Some(VisionError::BadArguments { .. }) | Some(VisionError::NoProcessor(_)) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error!("Failed to enqueue {} task: {}", task_type, e);
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

// Args: (source_path, socketid, result_path)
pub async fn enqueue_classify(
    State(task_manager): State<Arc<TaskManager>>,
    Json(request): Json<EnqueueRequest>,
) -> impl IntoResponse {
    enqueue(&task_manager, TaskType::Classify, request.args).await
}

// Args: (source_path, result_path, socketid)
pub async fn enqueue_extract_features(
    State(task_manager): State<Arc<TaskManager>>,
    Json(request): Json<EnqueueRequest>,
) -> impl IntoResponse {
    enqueue(&task_manager, TaskType::ExtractFeatures, request.args).await
}

pub async fn get_task_stats(State(task_manager): State<Arc<TaskManager>>) -> impl IntoResponse {
    let stats = task_manager.get_task_stats().await;
    match task_manager.queue_lengths().await {
        Ok(queued) => (
            StatusCode::OK,
            Json(ApiResponse::success(StatsResponse { stats, queued })),
        ),
        Err(e) => {
            error!("Failed to read queue lengths: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}
