use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::{Session, SessionInputs};
use ort::value::TensorRef;
use tracing::info;

use super::{Blob, Network, NetworkLoader};

/// Crop size of the reference CaffeNet export.
pub const DEFAULT_INPUT_DIMS: (usize, usize) = (227, 227);

/// Loads ONNX exports whose graph outputs list the intermediate blobs in
/// layer order, ending with the probability layer.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    model_path: PathBuf,
    input_dims: (usize, usize),
}

impl OnnxLoader {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            input_dims: DEFAULT_INPUT_DIMS,
        }
    }
}

impl NetworkLoader for OnnxLoader {
    fn load(&self) -> Result<Box<dyn Network>> {
        let session = Session::builder()?
            .commit_from_file(&self.model_path)
            .with_context(|| format!("failed to load model {}", self.model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow::anyhow!("model {} has no inputs", self.model_path.display()))?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            "Loaded model {} (input {}, {} blobs)",
            self.model_path.display(),
            input_name,
            output_names.len()
        );

        Ok(Box::new(OnnxNetwork {
            session,
            input_name,
            output_names,
            input_dims: self.input_dims,
        }))
    }
}

pub struct OnnxNetwork {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
    input_dims: (usize, usize),
}

impl Network for OnnxNetwork {
    fn input_dims(&self) -> (usize, usize) {
        self.input_dims
    }

    fn forward(&mut self, batch: Array4<f32>) -> Result<Vec<Blob>> {
        let dims: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
        let batch = batch.as_standard_layout();
        let data = batch
            .as_slice()
            .ok_or_else(|| anyhow::anyhow!("input batch is not contiguous in memory"))?;
        let tensor = TensorRef::from_array_view((dims, data))?;

        let inputs: SessionInputs<'_, '_, 0> =
            SessionInputs::ValueMap(vec![(Cow::Borrowed(self.input_name.as_str()), tensor.into())]);
        let outputs = self.session.run(inputs).context("forward pass failed")?;

        let mut blobs = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, values) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .with_context(|| format!("blob {} is not a f32 tensor", name))?;
            let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            blobs.push(Blob {
                name: name.clone(),
                data: ArrayD::from_shape_vec(IxDyn(&shape), values.to_vec())?,
            });
        }

        Ok(blobs)
    }
}
