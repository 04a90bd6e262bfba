#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use tracing::{error, info};
use std::sync::Arc;
use std::net::SocketAddr;
use vision_tasks::{
    channel::RedisChannel,
    classifier::{NetworkLoader, OnnxLoader},
    queue::RedisTaskQueue,
    schedule::{create_scheduler, ClassifyProcessor, ExtractFeaturesProcessor, TaskProcessor, TaskType},
    utils::logger,
    AppContext, WorkerConfig, CHANNEL, HTTP_ADDR, LOG_DIR, QUEUE_PREFIX, REDIS_URL,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 并创建日志目录
    vision_tasks::init_env();

    // 初始化日志系统
    let _guard = logger::init(LOG_DIR.clone())?;

    info!("Starting vision task worker ({})...", env!("GIT_HASH"));

    let config = WorkerConfig::from_env();
    info!("Model: {}", config.model_path.display());

    // 初始化 Redis 连接，进度通道在整个进程内共用一个
    info!("Connecting to Redis...");
    let channel = RedisChannel::connect(REDIS_URL.as_str(), CHANNEL.as_str()).await?;
    let queue = RedisTaskQueue::connect(REDIS_URL.as_str(), QUEUE_PREFIX.as_str()).await?;

    // 模型在每个任务开始时加载
    let loader: Arc<dyn NetworkLoader> = Arc::new(OnnxLoader::new(config.model_path.clone()));

    // 初始化调度器并启动
    info!("Initializing Scheduler...");
    let scheduler = Arc::new(create_scheduler(
        Arc::new(queue),
        Arc::new(channel),
        config.completion_message.clone(),
        vec![
            Box::new(ClassifyProcessor::new(loader.clone(), config.clone())) as Box<dyn TaskProcessor>,
            Box::new(ExtractFeaturesProcessor::new(loader)),
        ],
    ));
    for task_type in TaskType::ALL {
        scheduler.spawn_worker(task_type).await;
    }

    // 创建应用上下文
    let ctx = Arc::new(AppContext {
        task_manager: scheduler.task_manager().clone(),
    });

    // 配置服务器地址
    let addr: SocketAddr = HTTP_ADDR
        .parse()
        .with_context(|| format!("invalid VT_HTTP_ADDR: {}", HTTP_ADDR.as_str()))?;
    info!("Starting HTTP server at http://{}", addr);

    tokio::select! {
        result = vision_tasks::web::start_server(ctx.clone(), addr) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                scheduler.shutdown().await;
                return Err(e);
            }
            info!("Server stopped gracefully");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C");
        }
    }

    // 优雅关闭
    info!("Shutting down...");
    scheduler.shutdown().await;

    Ok(())
}
