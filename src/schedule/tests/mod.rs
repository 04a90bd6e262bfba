use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tempfile::{tempdir, TempDir};
use tokio::sync::{broadcast, Mutex};

use crate::channel::{ChannelMessage, EventChannel};
use crate::classifier::testing::FakeLoader;
use crate::error::VisionError;
use crate::queue::{Delivery, InMemoryTaskQueue, TaskMessage, TaskQueue};
use crate::schedule::processors::{ClassifyProcessor, ExtractFeaturesProcessor};
use crate::schedule::scheduler::{TaskManager, TaskWorker};
use crate::schedule::types::TaskType;
use crate::storage::mat::reader;
use crate::vision::npy::encode_f64;
use crate::WorkerConfig;

const COMPLETION: &str = "Thank you for using CloudCV";
const SCORES: [f32; 7] = [0.1, 0.9, 0.05, 0.3, 0.2, 0.4, 0.01];

// 测试环境：临时模型目录 + 内存队列 + 广播通道
struct Harness {
    dir: TempDir,
    task_manager: Arc<TaskManager>,
    rx: broadcast::Receiver<ChannelMessage>,
}

impl Harness {
    fn new() -> Result<Self> {
        let dir = tempdir()?;

        let labels_path = dir.path().join("labels.txt");
        let labels: Vec<String> = (0..SCORES.len()).map(|i| format!("label{}", i)).collect();
        std::fs::write(&labels_path, labels.join("\n"))?;

        let mean_path = dir.path().join("mean.npy");
        let mean: Vec<f64> = (0..12).map(|i| (i / 4) as f64 * 10.0).collect();
        std::fs::write(&mean_path, encode_f64(&[3, 2, 2], &mean))?;

        let config = WorkerConfig {
            model_path: dir.path().join("model.onnx"),
            mean_path,
            labels_path,
            completion_message: COMPLETION.to_string(),
        };

        let loader = Arc::new(FakeLoader::new((4, 4), SCORES.to_vec()));
        let (channel, rx) = EventChannel::new(64);

        let mut task_manager = TaskManager::new(
            Arc::new(InMemoryTaskQueue::new()),
            Arc::new(channel),
            COMPLETION.to_string(),
        );
        task_manager.register_processor(Box::new(ClassifyProcessor::new(loader.clone(), config)));
        task_manager.register_processor(Box::new(ExtractFeaturesProcessor::new(loader)));

        Ok(Self {
            dir,
            task_manager: Arc::new(task_manager),
            rx,
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn run(&self, task_type: TaskType, args: &[&str]) -> Result<bool> {
        let args = args.iter().map(|a| a.to_string()).collect();
        self.task_manager.enqueue(task_type, args).await?;
        self.run_next(task_type).await
    }

    async fn run_next(&self, task_type: TaskType) -> Result<bool> {
        TaskWorker::new(self.task_manager.clone(), task_type)
            .with_wait(Duration::from_millis(50))
            .process_next_task()
            .await
    }

    fn published(&mut self) -> Vec<ChannelMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

fn write_png(path: &Path, value: u8) {
    RgbImage::from_pixel(5, 4, Rgb([value, value / 2, 255 - value]))
        .save(path)
        .unwrap();
}

fn text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Decodes a classify payload into (key, [(label, score)]).
fn classify_result(message: &ChannelMessage) -> (String, Vec<(String, f32)>) {
    let payload: serde_json::Value = serde_json::from_str(message.result().unwrap()).unwrap();
    let (key, ranked) = payload.as_object().unwrap().iter().next().unwrap();
    let ranked = ranked
        .as_array()
        .unwrap()
        .iter()
        .map(|pair| {
            let label = pair[0].as_str().unwrap().to_string();
            let score: f32 = pair[1].as_str().unwrap().parse().unwrap();
            (label, score)
        })
        .collect();
    (key.clone(), ranked)
}

#[tokio::test]
async fn test_classify_directory() -> Result<()> {
    let mut harness = Harness::new()?;
    let input = harness.path("in");
    let output = harness.path("out");
    std::fs::create_dir_all(input.join("nested"))?;
    for (name, value) in [("b.png", 40), ("a.png", 200), ("c.png", 90)] {
        write_png(&input.join(name), value);
    }
    write_png(&input.join(".hidden.png"), 0);

    assert!(harness.run(TaskType::Classify, &[text(&input).as_str(), "sock-1", text(&output).as_str()]).await?);

    let messages = harness.published();
    assert_eq!(messages.len(), 5);
    assert!(messages[0].text().unwrap().starts_with("Completed in "));
    assert_eq!(messages[4].text(), Some(COMPLETION));
    assert!(messages.iter().all(|m| m.socketid() == "sock-1"));

    let keys: Vec<String> = messages[1..4].iter().map(|m| classify_result(m).0).collect();
    assert_eq!(
        keys,
        vec![
            text(&output.join("a.png")),
            text(&output.join("b.png")),
            text(&output.join("c.png"))
        ]
    );

    let (_, ranked) = classify_result(&messages[1]);
    let labels: Vec<&str> = ranked.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(labels, vec!["label1", "label5", "label3", "label4", "label0"]);
    assert!((ranked[0].1 - 0.9).abs() < 1e-5);
    assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
    Ok(())
}

#[tokio::test]
async fn test_classify_single_image_uses_destination_verbatim() -> Result<()> {
    let mut harness = Harness::new()?;
    let image = harness.path("cat.png");
    write_png(&image, 128);
    let destination = "/results/user-7/cat_result.png";

    harness.run(TaskType::Classify, &[text(&image).as_str(), "sock-2", destination]).await?;

    let messages = harness.published();
    let results: Vec<_> = messages.iter().filter(|m| m.result().is_some()).collect();
    assert_eq!(results.len(), 1);
    assert_eq!(classify_result(results[0]).0, destination);
    assert_eq!(messages.last().unwrap().text(), Some(COMPLETION));
    Ok(())
}

#[tokio::test]
async fn test_classify_serialized_array() -> Result<()> {
    let mut harness = Harness::new()?;
    let array = harness.path("batch.npy");
    std::fs::write(&array, encode_f64(&[2, 3, 3, 3], &[0.5; 54]))?;

    harness.run(TaskType::Classify, &[text(&array).as_str(), "sock-3", "/out/batch"]).await?;

    let keys: Vec<String> = harness
        .published()
        .iter()
        .filter(|m| m.result().is_some())
        .map(|m| classify_result(m).0)
        .collect();
    assert_eq!(keys, vec!["/out/batch/0", "/out/batch/1"]);
    Ok(())
}

#[tokio::test]
async fn test_classify_empty_directory() -> Result<()> {
    let mut harness = Harness::new()?;
    let input = harness.path("empty");
    std::fs::create_dir_all(&input)?;

    harness.run(TaskType::Classify, &[text(&input).as_str(), "sock-4", "/out"]).await?;

    let messages = harness.published();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].text().unwrap().starts_with("Completed in "));
    assert_eq!(messages[1].text(), Some(COMPLETION));
    Ok(())
}

#[tokio::test]
async fn test_failure_publishes_one_trace_and_no_completion() -> Result<()> {
    let mut harness = Harness::new()?;
    let missing = harness.path("missing.jpg");

    assert!(harness.run(TaskType::Classify, &[text(&missing).as_str(), "sock-5", "/out/x.jpg"]).await?);

    let messages = harness.published();
    assert_eq!(messages.len(), 1);
    let trace = messages[0].text().unwrap();
    assert!(!trace.is_empty());
    assert!(trace.contains("missing.jpg"));
    assert_ne!(trace, COMPLETION);
    assert_eq!(messages[0].socketid(), "sock-5");

    let stats = harness.task_manager.get_task_stats().await;
    assert_eq!((stats.completed, stats.failed), (0, 1));
    Ok(())
}

#[tokio::test]
async fn test_extract_features_single_image() -> Result<()> {
    let mut harness = Harness::new()?;
    let image = harness.path("dog.png");
    let output = harness.path("features");
    std::fs::create_dir_all(&output)?;
    write_png(&image, 77);

    harness.run(TaskType::ExtractFeatures, &[text(&image).as_str(), text(&output).as_str(), "sock-6"]).await?;

    let expected = output.join("dog.png.mat");
    let messages = harness.published();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].text(), Some("Processing dog.png"));
    assert!(messages[1].text().unwrap().starts_with("Completed in "));
    assert_eq!(messages[2].result(), Some(text(&expected).as_str()));
    assert_eq!(messages[3].text(), Some(COMPLETION));

    let vars = reader::read(&std::fs::read(&expected)?);
    let (decaf_dims, _) = &vars["decaf"];
    assert_eq!(*decaf_dims, (10, 4096));
    let (center_dims, center) = &vars["decaf_center"];
    assert_eq!(*center_dims, (1, 4096));
    assert!(center.iter().all(|v| *v == 4.0));
    Ok(())
}

#[tokio::test]
async fn test_extract_features_directory_and_rerun_overwrites() -> Result<()> {
    let mut harness = Harness::new()?;
    let input = harness.path("frames");
    let output = harness.path("features");
    std::fs::create_dir_all(&input)?;
    std::fs::create_dir_all(&output)?;
    write_png(&input.join("1.png"), 10);
    write_png(&input.join("2.png"), 20);

    let args = [text(&input), text(&output), "sock-7".to_string()];
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    harness.run(TaskType::ExtractFeatures, &args).await?;
    let first = harness.published();
    harness.run(TaskType::ExtractFeatures, &args).await?;
    let second = harness.published();

    // 2 x (processing, timing, result) + completion
    assert_eq!(first.len(), 7);
    assert_eq!(without_timing(&first), without_timing(&second));

    let mut files: Vec<String> = std::fs::read_dir(&output)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    files.sort();
    assert_eq!(files, vec!["1.png.mat", "2.png.mat"]);
    Ok(())
}

fn without_timing(messages: &[ChannelMessage]) -> Vec<ChannelMessage> {
    messages
        .iter()
        .filter(|m| !m.text().map_or(false, |t| t.starts_with("Completed in ")))
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_malformed_message_is_dropped() -> Result<()> {
    let mut harness = Harness::new()?;
    let message = TaskMessage::new(TaskType::Classify, vec!["/in/a.jpg".into(), "sock-8".into()]);
    harness.task_manager.queue().push(&message).await?;

    assert!(!harness.run_next(TaskType::Classify).await?);
    assert!(harness.published().is_empty());
    assert_eq!(harness.task_manager.get_task_stats().await.dropped, 1);
    assert_eq!(harness.task_manager.queue().len(TaskType::Classify).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_enqueue_rejects_wrong_arity() -> Result<()> {
    let harness = Harness::new()?;
    let err = harness
        .task_manager
        .enqueue(TaskType::ExtractFeatures, vec!["/in".into()])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VisionError>(),
        Some(VisionError::BadArguments { expected: 3, got: 1, .. })
    ));
    assert_eq!(harness.task_manager.queue_lengths().await?["extract_features"], 0);
    Ok(())
}

#[tokio::test]
async fn test_idle_worker_returns_false() -> Result<()> {
    let harness = Harness::new()?;
    assert!(!harness.run_next(TaskType::ExtractFeatures).await?);
    Ok(())
}

#[tokio::test]
async fn test_results_before_a_failure_stay_published() -> Result<()> {
    let mut harness = Harness::new()?;
    let input = harness.path("frames");
    let output = harness.path("features");
    std::fs::create_dir_all(&input)?;
    std::fs::create_dir_all(&output)?;
    write_png(&input.join("1.png"), 10);
    std::fs::write(input.join("2.png"), b"definitely not a png")?;

    assert!(harness.run(TaskType::ExtractFeatures, &[text(&input).as_str(), text(&output).as_str(), "sock-9"]).await?);

    let messages = harness.published();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0].text(), Some("Processing 1.png"));
    assert!(messages[1].text().unwrap().starts_with("Completed in "));
    assert_eq!(messages[2].result(), Some(text(&output.join("1.png.mat")).as_str()));
    assert_eq!(messages[3].text(), Some("Processing 2.png"));
    let trace = messages[4].text().unwrap();
    assert!(trace.contains("2.png"));
    assert!(messages.iter().all(|m| m.text() != Some(COMPLETION)));

    // 已写出的结果不回滚
    assert!(output.join("1.png.mat").exists());
    let stats = harness.task_manager.get_task_stats().await;
    assert_eq!((stats.completed, stats.failed), (0, 1));
    Ok(())
}

/// Hands out whatever deliveries it was built with, then nothing.
struct ScriptedQueue {
    deliveries: Mutex<Vec<Delivery>>,
}

#[async_trait]
impl TaskQueue for ScriptedQueue {
    async fn push(&self, message: &TaskMessage) -> Result<()> {
        self.deliveries.lock().await.insert(0, Delivery::Task(message.clone()));
        Ok(())
    }

    async fn pop(&self, _task_type: TaskType, _timeout: Duration) -> Result<Option<Delivery>> {
        Ok(self.deliveries.lock().await.pop())
    }

    async fn len(&self, _task_type: TaskType) -> Result<usize> {
        Ok(self.deliveries.lock().await.len())
    }
}

#[tokio::test]
async fn test_undecodable_payload_is_counted_as_dropped() -> Result<()> {
    let (channel, mut rx) = EventChannel::new(8);
    let queue = ScriptedQueue {
        deliveries: Mutex::new(vec![Delivery::decode("{\"task\": 42".to_string())]),
    };
    let task_manager = Arc::new(TaskManager::new(
        Arc::new(queue),
        Arc::new(channel),
        COMPLETION.to_string(),
    ));

    let worker = TaskWorker::new(task_manager.clone(), TaskType::Classify);
    assert!(!worker.process_next_task().await?);
    assert_eq!(task_manager.get_task_stats().await.dropped, 1);
    assert!(rx.try_recv().is_err());
    Ok(())
}

