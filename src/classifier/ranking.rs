use std::cmp::Ordering;

use anyhow::Result;
use ndarray::ArrayView1;

use super::labels::LabelTable;

/// Number of predictions reported per input.
pub const TOP_K: usize = 5;

// Descending by score. NaN sorts after every real score.
fn by_score_desc(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// The `k` best (class index, score) pairs. Equal scores keep index order.
pub fn top_k(scores: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    // sort_by is stable, so ties stay in index order
    ranked.sort_by(|a, b| by_score_desc(a.1, b.1));
    ranked.truncate(k);
    ranked
}

/// Top-k as `[label, score]` pairs ready for publishing.
pub fn top_labels(
    scores: ArrayView1<f32>,
    labels: &LabelTable,
    k: usize,
) -> Result<Vec<(String, String)>> {
    top_k(scores, k)
        .into_iter()
        .map(|(index, score)| -> Result<(String, String)> {
            Ok((labels.get(index)?.to_string(), score.to_string()))
        })
        .collect()
}
