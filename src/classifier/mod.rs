use anyhow::Result;
use ndarray::{s, stack, Array2, Array3, Array4, ArrayD, ArrayView3, Axis};
use tracing::debug;

use crate::error::VisionError;
use crate::vision::transform::{self, Transformer, CROPS_PER_IMAGE};

pub mod labels;
pub mod onnx;
pub mod ranking;

pub use labels::LabelTable;
pub use onnx::OnnxLoader;

/// One named activation tensor from a forward pass.
#[derive(Debug, Clone)]
pub struct Blob {
    pub name: String,
    pub data: ArrayD<f32>,
}

/// A loaded network. Blobs come back in layer order; the last one holds the
/// class probabilities.
pub trait Network: Send {
    /// (height, width) of a single network input.
    fn input_dims(&self) -> (usize, usize);

    fn forward(&mut self, batch: Array4<f32>) -> Result<Vec<Blob>>;
}

/// Creates a fresh network instance. Each job loads its own.
pub trait NetworkLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn Network>>;
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierParams {
    pub image_dims: Option<(usize, usize)>,
    pub transformer: Transformer,
}

impl ClassifierParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image_dims(&mut self, image_dims: (usize, usize)) -> &mut Self {
        self.image_dims = Some(image_dims);
        self
    }

    pub fn set_channel_swap(&mut self, channel_swap: Vec<usize>) -> &mut Self {
        self.transformer.channel_swap = Some(channel_swap);
        self
    }

    pub fn set_raw_scale(&mut self, raw_scale: f32) -> &mut Self {
        self.transformer.raw_scale = Some(raw_scale);
        self
    }

    pub fn set_mean(&mut self, mean: Vec<f32>) -> &mut Self {
        self.transformer.mean = Some(mean);
        self
    }
}

/// Image classifier over a [`Network`]: resizes, crops and normalizes
/// inputs, runs them as one batch and keeps the blobs of the last pass.
pub struct Classifier {
    net: Box<dyn Network>,
    image_dims: (usize, usize),
    transformer: Transformer,
    blobs: Vec<Blob>,
}

impl Classifier {
    pub fn new(net: Box<dyn Network>, params: ClassifierParams) -> Self {
        let image_dims = params.image_dims.unwrap_or_else(|| net.input_dims());
        Self {
            net,
            image_dims,
            transformer: params.transformer,
            blobs: Vec::new(),
        }
    }

    /// Class probabilities, one row per input. With `oversample` every input
    /// is evaluated on ten crops and the rows are averaged.
    pub fn predict(&mut self, inputs: &[Array3<f32>], oversample: bool) -> Result<Array2<f32>> {
        if inputs.is_empty() {
            self.blobs.clear();
            return Ok(Array2::zeros((0, 0)));
        }

        let (height, width) = self.image_dims;
        let resized = inputs
            .iter()
            .map(|image| transform::resize(image, height, width))
            .collect::<Result<Vec<_>>>()?;

        let crop = self.net.input_dims();
        let crops = if oversample {
            transform::oversample(&resized, crop)?
        } else {
            transform::center_crop(&resized, crop)?
        };

        let prepared = crops
            .iter()
            .map(|c| self.transformer.preprocess(c))
            .collect::<Result<Vec<_>, VisionError>>()?;
        let views: Vec<ArrayView3<f32>> = prepared.iter().map(|p| p.view()).collect();
        let batch = stack(Axis(0), &views)?;
        debug!("Forwarding batch of shape {:?}", batch.shape());

        self.blobs = self.net.forward(batch)?;
        let output = self.blobs.last().ok_or(VisionError::EmptyForward)?;
        let predictions = blob_matrix(&output.data)?;
        if predictions.nrows() != crops.len() {
            return Err(anyhow::anyhow!(
                "network returned {} rows for {} crops",
                predictions.nrows(),
                crops.len()
            ));
        }

        if !oversample {
            return Ok(predictions);
        }

        let averaged: Vec<_> = (0..inputs.len())
            .map(|i| {
                predictions
                    .slice(s![i * CROPS_PER_IMAGE..(i + 1) * CROPS_PER_IMAGE, ..])
                    .mean_axis(Axis(0))
                    .ok_or(VisionError::EmptyForward)
            })
            .collect::<Result<_, _>>()?;
        let views: Vec<_> = averaged.iter().map(|row| row.view()).collect();
        Ok(stack(Axis(0), &views)?)
    }

    /// Blobs from the most recent forward pass, in layer order.
    pub fn blobs(&self) -> &[Blob] {
        &self.blobs
    }

    /// The blob `offset` positions from the end of the layer list
    /// (1 is the output layer).
    pub fn blob_from_end(&self, offset: usize) -> Result<&Blob, VisionError> {
        let len = self.blobs.len();
        if offset == 0 || offset > len {
            return Err(VisionError::MissingLayer { len, offset });
        }
        Ok(&self.blobs[len - offset])
    }
}

/// Views a blob as (batch, values): 2-D blobs as-is, higher ranks take
/// position 0 of every trailing spatial axis (`data[:, :, 0, 0]`).
pub fn blob_matrix(data: &ArrayD<f32>) -> Result<Array2<f32>, VisionError> {
    if data.ndim() < 2 {
        return Err(VisionError::UnsupportedLayout(format!(
            "blob of shape {:?} has no batch axis",
            data.shape()
        )));
    }
    let mut view = data.view();
    while view.ndim() > 2 {
        if view.len_of(Axis(2)) == 0 {
            return Err(VisionError::UnsupportedLayout(format!(
                "blob of shape {:?} has an empty spatial axis",
                data.shape()
            )));
        }
        view = view.index_axis_move(Axis(2), 0);
    }
    view.into_dimensionality::<ndarray::Ix2>()
        .map(|v| v.to_owned())
        .map_err(|e| VisionError::UnsupportedLayout(e.to_string()))
}
