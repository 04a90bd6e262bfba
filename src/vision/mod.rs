pub mod npy;
pub mod transform;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array3, Axis, Ix3, Ix4};
use tracing::info;

use crate::error::VisionError;
use npy::NpyDtype;

pub use transform::{Transformer, CENTER_CROP_INDEX, CROPS_PER_IMAGE};

/// Where a job's images come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A serialized `.npy` array holding one or more images.
    Array(PathBuf),
    /// Every regular file directly inside a directory.
    Directory(PathBuf),
    /// One image file.
    Image(PathBuf),
}

impl InputSource {
    pub fn resolve(path: &Path) -> Self {
        if path.to_string_lossy().ends_with("npy") {
            InputSource::Array(path.to_path_buf())
        } else if path.is_dir() {
            InputSource::Directory(path.to_path_buf())
        } else {
            InputSource::Image(path.to_path_buf())
        }
    }
}

/// Decodes an image file to an (H, W, 3) array with values in [0, 1].
pub fn load_image(path: &Path) -> Result<Array3<f32>> {
    let img = image::open(path)
        .with_context(|| format!("failed to load image {}", path.display()))?;
    let rgb = img.to_rgb32f();
    let (width, height) = rgb.dimensions();
    Ok(Array3::from_shape_vec(
        (height as usize, width as usize, 3),
        rgb.into_raw(),
    )?)
}

/// Regular, non-hidden files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Splits a serialized array into images. Accepts (N, H, W, C) or (H, W, C);
/// `u1` data is scaled to [0, 1] to match decoded images.
pub fn load_array(path: &Path) -> Result<Vec<Array3<f32>>> {
    let npy = npy::read_npy(path)?;
    let mut array = npy.array;
    if npy.dtype == NpyDtype::U8 {
        array.mapv_inplace(|v| v / 255.0);
    }

    match array.ndim() {
        3 => Ok(vec![array.into_dimensionality::<Ix3>()?]),
        4 => {
            let batch = array.into_dimensionality::<Ix4>()?;
            Ok(batch.axis_iter(Axis(0)).map(|image| image.to_owned()).collect())
        }
        _ => Err(VisionError::UnsupportedLayout(format!(
            "expected (N, H, W, C) or (H, W, C), got {:?}",
            array.shape()
        ))
        .into()),
    }
}

/// Loads every image a source refers to, in a stable order.
///
/// The returned paths pair with the images: file paths for directories and
/// single images, the array path (repeated) for serialized arrays.
pub fn load_inputs(source: &InputSource) -> Result<(Vec<PathBuf>, Vec<Array3<f32>>)> {
    match source {
        InputSource::Array(path) => {
            let images = load_array(path)?;
            info!("Loaded {} images from {}", images.len(), path.display());
            Ok((vec![path.clone(); images.len()], images))
        }
        InputSource::Directory(dir) => {
            let files = list_images(dir)?;
            let images = files
                .iter()
                .map(|file| load_image(file))
                .collect::<Result<Vec<_>>>()?;
            info!("Loaded {} images from {}", images.len(), dir.display());
            Ok((files, images))
        }
        InputSource::Image(path) => Ok((vec![path.clone()], vec![load_image(path)?])),
    }
}
