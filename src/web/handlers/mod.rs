use axum::{routing::get, Router};
use std::sync::Arc;
use crate::AppContext;

pub mod tasks;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .nest("/tasks", tasks::tasks_router(ctx.task_manager.clone()))
        .route("/health", get(health))
}

async fn health() -> &'static str {
    "ok"
}
