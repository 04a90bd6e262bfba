use anyhow::Result;
use image::{imageops, imageops::FilterType, ImageBuffer, Rgb};
use ndarray::{s, Array3, ArrayD, Axis};

use crate::error::VisionError;

/// Crops generated per input when oversampling: four corners and the
/// center, followed by their horizontal mirrors.
pub const CROPS_PER_IMAGE: usize = 10;

/// Position of the unmirrored center crop inside each group of crops.
pub const CENTER_CROP_INDEX: usize = 4;

/// Turns an HWC image into a CHW network input.
///
/// Steps run in a fixed order: transpose, channel swap, raw scale, mean
/// subtraction. Every step is optional; the default transformer only
/// transposes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformer {
    pub channel_swap: Option<Vec<usize>>,
    pub raw_scale: Option<f32>,
    pub mean: Option<Vec<f32>>,
}

impl Transformer {
    pub fn preprocess(&self, image: &Array3<f32>) -> Result<Array3<f32>, VisionError> {
        let mut chw = image
            .view()
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned();
        let channels = chw.len_of(Axis(0));

        if let Some(order) = &self.channel_swap {
            if order.len() != channels || order.iter().any(|&c| c >= channels) {
                return Err(VisionError::UnsupportedLayout(format!(
                    "channel swap {:?} does not fit {} channels",
                    order, channels
                )));
            }
            chw = chw.select(Axis(0), order);
        }

        if let Some(scale) = self.raw_scale {
            chw.mapv_inplace(|v| v * scale);
        }

        if let Some(mean) = &self.mean {
            if mean.len() != channels {
                return Err(VisionError::UnsupportedLayout(format!(
                    "mean has {} channels, image has {}",
                    mean.len(),
                    channels
                )));
            }
            for (c, m) in mean.iter().enumerate() {
                chw.index_axis_mut(Axis(0), c).mapv_inplace(|v| v - m);
            }
        }

        Ok(chw)
    }
}

/// Reduces a (C, H, W) mean image to one value per channel.
pub fn channel_mean(mean_image: &ArrayD<f32>) -> Result<Vec<f32>, VisionError> {
    if mean_image.ndim() != 3 {
        return Err(VisionError::UnsupportedLayout(format!(
            "mean image must be (C, H, W), got {:?}",
            mean_image.shape()
        )));
    }
    Ok(mean_image
        .outer_iter()
        .map(|channel| channel.mean().unwrap_or(0.0))
        .collect())
}

/// Bilinear resize of an RGB float image.
pub fn resize(image: &Array3<f32>, height: usize, width: usize) -> Result<Array3<f32>> {
    let (h, w, c) = image.dim();
    if h == height && w == width {
        return Ok(image.clone());
    }
    if c != 3 {
        return Err(VisionError::UnsupportedLayout(format!(
            "only 3-channel images can be resized, got {}",
            c
        ))
        .into());
    }

    let raw: Vec<f32> = image.iter().copied().collect();
    let buffer: ImageBuffer<Rgb<f32>, Vec<f32>> = ImageBuffer::from_raw(w as u32, h as u32, raw)
        .ok_or_else(|| VisionError::UnsupportedLayout("image buffer size mismatch".to_string()))?;
    let resized = imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle);

    Ok(Array3::from_shape_vec((height, width, 3), resized.into_raw())?)
}

fn check_fits(image: &Array3<f32>, crop: (usize, usize)) -> Result<(), VisionError> {
    let (h, w, _) = image.dim();
    if h < crop.0 || w < crop.1 {
        return Err(VisionError::UnsupportedLayout(format!(
            "image {}x{} is smaller than crop {}x{}",
            h, w, crop.0, crop.1
        )));
    }
    Ok(())
}

// Top-left corner of a crop centered in an image, truncated like an int cast.
fn center_origin(image: &Array3<f32>, crop: (usize, usize)) -> (usize, usize) {
    let (h, w, _) = image.dim();
    let y = (h as f32 / 2.0 - crop.0 as f32 / 2.0) as usize;
    let x = (w as f32 / 2.0 - crop.1 as f32 / 2.0) as usize;
    (y, x)
}

/// Ten crops per image, image-major.
pub fn oversample(images: &[Array3<f32>], crop: (usize, usize)) -> Result<Vec<Array3<f32>>> {
    let (ch, cw) = crop;
    let mut crops = Vec::with_capacity(images.len() * CROPS_PER_IMAGE);

    for image in images {
        check_fits(image, crop)?;
        let (h, w, _) = image.dim();

        let mut origins = Vec::with_capacity(CROPS_PER_IMAGE / 2);
        for y in [0, h - ch] {
            for x in [0, w - cw] {
                origins.push((y, x));
            }
        }
        origins.push(center_origin(image, crop));

        let group: Vec<Array3<f32>> = origins
            .iter()
            .map(|&(y, x)| image.slice(s![y..y + ch, x..x + cw, ..]).to_owned())
            .collect();
        let mirrored: Vec<Array3<f32>> = group
            .iter()
            .map(|c| c.slice(s![.., ..;-1, ..]).to_owned())
            .collect();

        crops.extend(group);
        crops.extend(mirrored);
    }

    Ok(crops)
}

/// One center crop per image.
pub fn center_crop(images: &[Array3<f32>], crop: (usize, usize)) -> Result<Vec<Array3<f32>>> {
    images
        .iter()
        .map(|image| -> Result<Array3<f32>> {
            check_fits(image, crop)?;
            let (y, x) = center_origin(image, crop);
            Ok(image.slice(s![y..y + crop.0, x..x + crop.1, ..]).to_owned())
        })
        .collect()
}
