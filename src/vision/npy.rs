//! `.npy` loading for mean images and serialized inputs.
//!
//! Arrays are read as `f4`, `f8` or `u1` and widened to `f32`.

use std::path::Path;

use anyhow::{Context, Result};
use ndarray::ArrayD;
use ndarray_npy::{ReadNpyError, ReadNpyExt};

use crate::error::VisionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpyDtype {
    F32,
    F64,
    U8,
}

#[derive(Debug)]
pub struct NpyArray {
    pub dtype: NpyDtype,
    pub array: ArrayD<f32>,
}

pub fn read_npy(path: &Path) -> Result<NpyArray> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read npy file {}", path.display()))?;
    let array = parse_npy(&bytes)
        .with_context(|| format!("failed to parse npy file {}", path.display()))?;
    Ok(array)
}

fn invalid(err: ReadNpyError) -> VisionError {
    VisionError::InvalidNpy(err.to_string())
}

pub fn parse_npy(bytes: &[u8]) -> Result<NpyArray, VisionError> {
    // 依次尝试支持的类型，descr 不匹配时换下一个
    match ArrayD::<f32>::read_npy(bytes) {
        Ok(array) => return Ok(NpyArray { dtype: NpyDtype::F32, array }),
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        Err(e) => return Err(invalid(e)),
    }

    match ArrayD::<f64>::read_npy(bytes) {
        Ok(array) => {
            return Ok(NpyArray {
                dtype: NpyDtype::F64,
                array: array.mapv(|v| v as f32),
            })
        }
        Err(ReadNpyError::WrongDescriptor(_)) => {}
        Err(e) => return Err(invalid(e)),
    }

    let array = ArrayD::<u8>::read_npy(bytes).map_err(invalid)?;
    Ok(NpyArray {
        dtype: NpyDtype::U8,
        array: array.mapv(f32::from),
    })
}

/// Encodes a C-order `<f8` array, used by tests to fabricate mean files and inputs.
#[cfg(test)]
pub(crate) fn encode_f64(shape: &[usize], values: &[f64]) -> Vec<u8> {
    use ndarray::IxDyn;
    use ndarray_npy::WriteNpyExt;

    let array = ArrayD::from_shape_vec(IxDyn(shape), values.to_vec()).unwrap();
    let mut out = Vec::new();
    array.write_npy(&mut out).unwrap();
    out
}
