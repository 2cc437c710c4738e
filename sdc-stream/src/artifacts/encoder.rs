//! Label decoder: raw class index → human-readable label

use serde::{Deserialize, Serialize};

use crate::error::PredictionError;

pub trait LabelDecoder: Send + Sync {
    /// Map class indices back to their original labels
    fn inverse_transform(&self, indices: &[usize]) -> Result<Vec<String>, PredictionError>;

    /// Known labels, in index order
    fn classes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Fitted label encoder as stored in `artifacts.json`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }
}

impl LabelDecoder for LabelEncoder {
    fn inverse_transform(&self, indices: &[usize]) -> Result<Vec<String>, PredictionError> {
        indices
            .iter()
            .map(|&index| {
                self.classes
                    .get(index)
                    .cloned()
                    .ok_or(PredictionError::ClassOutOfRange {
                        index,
                        classes: self.classes.len(),
                    })
            })
            .collect()
    }

    fn classes(&self) -> Vec<String> {
        self.classes.clone()
    }
}
