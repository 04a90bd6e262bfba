use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use ndarray::Array2;
use tracing::{debug, info};

use crate::channel::Progress;
use crate::classifier::{blob_matrix, Classifier, ClassifierParams, NetworkLoader};
use crate::error::VisionError;
use crate::schedule::types::{Task, TaskType};
use crate::storage::mat;
use crate::vision::{list_images, load_image, CENTER_CROP_INDEX};
use super::TaskProcessor;

/// Length of the flattened center-crop feature.
pub const FEATURE_DIM: usize = 4096;
/// The feature layer sits this many blobs before the end of the layer list.
pub const FEATURE_LAYER_FROM_END: usize = 3;

#[derive(Debug)]
pub struct DecafFeatures {
    /// One row per crop.
    pub decaf: Array2<f32>,
    /// The center crop's row, cycled or truncated to (1, FEATURE_DIM).
    pub decaf_center: Array2<f32>,
}

/// Pulls the feature layer out of the classifier's last forward pass.
pub fn decaf_features(classifier: &Classifier) -> Result<DecafFeatures> {
    let blob = classifier.blob_from_end(FEATURE_LAYER_FROM_END)?;
    let decaf = blob_matrix(&blob.data)?;
    debug!("Feature blob {} has shape {:?}", blob.name, decaf.dim());

    if decaf.nrows() <= CENTER_CROP_INDEX {
        return Err(VisionError::MissingCenterCrop {
            rows: decaf.nrows(),
            index: CENTER_CROP_INDEX,
        }
        .into());
    }

    let center = decaf.row(CENTER_CROP_INDEX);
    let decaf_center = if center.is_empty() {
        Array2::zeros((1, FEATURE_DIM))
    } else {
        let values: Vec<f32> = center.iter().copied().cycle().take(FEATURE_DIM).collect();
        Array2::from_shape_vec((1, FEATURE_DIM), values)?
    };

    Ok(DecafFeatures { decaf, decaf_center })
}

pub struct ExtractFeaturesProcessor {
    loader: Arc<dyn NetworkLoader>,
}

impl ExtractFeaturesProcessor {
    pub fn new(loader: Arc<dyn NetworkLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl TaskProcessor for ExtractFeaturesProcessor {
    fn task_type(&self) -> TaskType {
        TaskType::ExtractFeatures
    }

    async fn process(&self, task: &Task, progress: &Progress<'_>) -> Result<()> {
        let request = &task.request;
        info!(task_id = %task.id, "Extracting features from {}", request.source_path.display());

        let loader = self.loader.clone();
        let mut classifier = tokio::task::spawn_blocking(move || -> Result<Classifier> {
            Ok(Classifier::new(loader.load()?, ClassifierParams::new()))
        })
        .await??;

        let files: Vec<PathBuf> = if request.source_path.is_dir() {
            list_images(&request.source_path)?
        } else {
            vec![request.source_path.clone()]
        };

        for file in files {
            let name = file
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            progress.message(format!("Processing {}", name)).await?;

            // classifier 移入阻塞线程，处理完再取回
            let (returned, features, elapsed) = tokio::task::spawn_blocking(move || -> Result<_> {
                let image = load_image(&file)?;
                let started = Instant::now();
                classifier.predict(&[image], true)?;
                let elapsed = started.elapsed();
                let features = decaf_features(&classifier)?;
                Ok((classifier, features, elapsed))
            })
            .await??;
            classifier = returned;

            progress
                .message(format!("Completed in {:.2} s.", elapsed.as_secs_f64()))
                .await?;

            let output = request.result_destination.join(format!("{}.mat", name));
            mat::save(
                &output,
                &[
                    ("decaf", features.decaf.view()),
                    ("decaf_center", features.decaf_center.view()),
                ],
            )?;
            progress.raw_result(output.to_string_lossy()).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::FakeLoader;
    use ndarray::Array3;

    fn classifier_after_forward(input_dims: (usize, usize)) -> Classifier {
        let loader = FakeLoader::new(input_dims, vec![0.5, 0.5]);
        let mut classifier = Classifier::new(loader.load().unwrap(), ClassifierParams::new());
        classifier
            .predict(&[Array3::<f32>::zeros((6, 5, 3))], true)
            .unwrap();
        classifier
    }

    #[test]
    fn test_center_row_is_the_center_crop() {
        let features = decaf_features(&classifier_after_forward((4, 4))).unwrap();
        assert_eq!(features.decaf.dim(), (10, FEATURE_DIM));
        assert_eq!(features.decaf[[7, 0]], 7.0);
        assert_eq!(features.decaf_center.dim(), (1, FEATURE_DIM));
        assert!(features.decaf_center.iter().all(|v| *v == CENTER_CROP_INDEX as f32));
    }

    #[test]
    fn test_needs_a_forward_pass() {
        let loader = FakeLoader::new((4, 4), vec![1.0]);
        let classifier = Classifier::new(loader.load().unwrap(), ClassifierParams::new());
        let err = decaf_features(&classifier).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VisionError>(),
            Some(VisionError::MissingLayer { .. })
        ));
    }
}
