use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::VisionError;

/// Class index to human-readable tag, one label per line of the side file.
#[derive(Debug, Clone)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label table {}", path.display()))?;
        let labels: Vec<String> = content.lines().map(|line| line.trim_end().to_string()).collect();
        debug!("Loaded {} labels from {}", labels.len(), path.display());
        Ok(Self { labels })
    }

    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn get(&self, index: usize) -> Result<&str, VisionError> {
        self.labels
            .get(index)
            .map(String::as_str)
            .ok_or(VisionError::LabelOutOfRange {
                index,
                len: self.labels.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
