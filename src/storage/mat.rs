//! MATLAB level 5 MAT-file writer.
//!
//! Writes little-endian files holding 2-D single-precision matrices, which is
//! all the feature files need. Data is stored column-major.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use ndarray::ArrayView2;
use tracing::debug;

const HEADER_TEXT_LEN: usize = 116;
const MAX_NAME_LEN: usize = 63;

const MI_INT8: u32 = 1;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_MATRIX: u32 = 14;
const MX_SINGLE_CLASS: u32 = 7;

fn push_element(buf: &mut Vec<u8>, data_type: u32, payload: &[u8]) {
    buf.extend_from_slice(&data_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let padding = (8 - payload.len() % 8) % 8;
    buf.extend(std::iter::repeat(0u8).take(padding));
}

fn encode_matrix(name: &str, matrix: ArrayView2<f32>) -> Result<Vec<u8>> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || !name.is_ascii() {
        anyhow::bail!("invalid MAT variable name {:?}", name);
    }
    let (rows, cols) = matrix.dim();

    let mut body = Vec::new();

    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&MX_SINGLE_CLASS.to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    push_element(&mut body, MI_UINT32, &flags);

    let mut dims = Vec::with_capacity(8);
    dims.extend_from_slice(&(rows as i32).to_le_bytes());
    dims.extend_from_slice(&(cols as i32).to_le_bytes());
    push_element(&mut body, MI_INT32, &dims);

    push_element(&mut body, MI_INT8, name.as_bytes());

    // column-major: walk the transposed view in logical order
    let values: Vec<u8> = matrix
        .t()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    push_element(&mut body, MI_SINGLE, &values);

    let mut element = Vec::with_capacity(body.len() + 8);
    push_element(&mut element, MI_MATRIX, &body);
    Ok(element)
}

/// Serializes named matrices into MAT-file bytes.
pub fn encode(variables: &[(&str, ArrayView2<f32>)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    let mut text = format!(
        "MATLAB 5.0 MAT-file Platform: {}, Created on: {}",
        std::env::consts::OS,
        Utc::now().format("%a %b %e %H:%M:%S %Y")
    );
    text.truncate(HEADER_TEXT_LEN);
    out.extend_from_slice(text.as_bytes());
    out.resize(HEADER_TEXT_LEN, b' ');
    // subsystem data offset
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&0x0100u16.to_le_bytes());
    out.extend_from_slice(b"IM");

    for (name, matrix) in variables {
        out.extend(encode_matrix(name, *matrix)?);
    }

    Ok(out)
}

/// Writes a MAT-file, replacing any existing file at `path`.
pub fn save(path: &Path, variables: &[(&str, ArrayView2<f32>)]) -> Result<()> {
    let bytes = encode(variables)?;
    std::fs::write(path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
