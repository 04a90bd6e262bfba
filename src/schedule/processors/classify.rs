use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::channel::Progress;
use crate::classifier::ranking::{top_labels, TOP_K};
use crate::classifier::{Classifier, ClassifierParams, LabelTable, NetworkLoader};
use crate::schedule::types::{Task, TaskType};
use crate::vision::npy::read_npy;
use crate::vision::transform::channel_mean;
use crate::vision::{load_inputs, InputSource};
use crate::WorkerConfig;
use super::TaskProcessor;

/// Inputs are resized to this before cropping.
pub const CLASSIFY_IMAGE_DIMS: (usize, usize) = (256, 256);
// 模型按 BGR 训练
const CHANNEL_SWAP: [usize; 3] = [2, 1, 0];
const RAW_SCALE: f32 = 255.0;

pub struct ClassifyProcessor {
    loader: Arc<dyn NetworkLoader>,
    config: WorkerConfig,
}

impl ClassifyProcessor {
    pub fn new(loader: Arc<dyn NetworkLoader>, config: WorkerConfig) -> Self {
        Self { loader, config }
    }

    fn classifier_params(&self) -> Result<ClassifierParams> {
        let mean = channel_mean(&read_npy(&self.config.mean_path)?.array)?;

        let mut params = ClassifierParams::new();
        params
            .set_image_dims(CLASSIFY_IMAGE_DIMS)
            .set_channel_swap(CHANNEL_SWAP.to_vec())
            .set_raw_scale(RAW_SCALE)
            .set_mean(mean);
        Ok(params)
    }
}

/// The key each input's result is published under.
///
/// Directory inputs map to `destination/<file name>`, a single image to
/// `destination` itself. A serialized array counts as a single file; when it
/// holds several images each row gets `destination/<row>`.
pub fn result_keys(source: &InputSource, destination: &Path, files: &[PathBuf]) -> Vec<String> {
    match source {
        InputSource::Directory(_) => files
            .iter()
            .map(|file| {
                let name = file.file_name().unwrap_or_default();
                destination.join(name).to_string_lossy().into_owned()
            })
            .collect(),
        InputSource::Array(_) if files.len() > 1 => (0..files.len())
            .map(|row| destination.join(row.to_string()).to_string_lossy().into_owned())
            .collect(),
        InputSource::Array(_) | InputSource::Image(_) => {
            vec![destination.to_string_lossy().into_owned(); files.len()]
        }
    }
}

#[async_trait]
impl TaskProcessor for ClassifyProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::Classify
    }

    async fn process(&self, task: &Task, progress: &Progress<'_>) -> Result<()> {
        let request = &task.request;
        info!(task_id = %task.id, "Classifying {}", request.source_path.display());

        let labels = LabelTable::load(&self.config.labels_path)?;
        let params = self.classifier_params()?;
        let source = InputSource::resolve(&request.source_path);

        // 推理是 CPU 密集型，放到阻塞线程池
        let loader = self.loader.clone();
        let blocking_source = source.clone();
        let (files, predictions, elapsed) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut classifier = Classifier::new(loader.load()?, params);
            let (files, inputs) = load_inputs(&blocking_source)?;
            let started = Instant::now();
            let predictions = classifier.predict(&inputs, true)?;
            Ok((files, predictions, started.elapsed()))
        })
        .await??;

        progress
            .message(format!("Completed in {:.2} s.", elapsed.as_secs_f64()))
            .await?;

        let keys = result_keys(&source, &request.result_destination, &files);
        for (key, scores) in keys.into_iter().zip(predictions.outer_iter()) {
            let mut payload = BTreeMap::new();
            payload.insert(key, top_labels(scores, &labels, TOP_K)?);
            progress.json_result(&payload).await?;
        }

        info!(task_id = %task.id, "Classified {} inputs", files.len());
        Ok(())
    }
}
