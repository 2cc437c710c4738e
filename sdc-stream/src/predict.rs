//! Prediction engine

use sdc_common::Features;

use crate::artifacts::{ArtifactBundle, FeatureFrame};
use crate::error::PredictionError;

/// Run the model on one student's features and return the decoded label
pub fn predict(bundle: &ArtifactBundle, features: &Features) -> Result<String, PredictionError> {
    let frame = FeatureFrame::single(features);
    let indices = bundle.model().predict(&frame)?;
    if indices.len() != 1 {
        return Err(PredictionError::UnexpectedOutputLength(indices.len()));
    }

    bundle
        .label_decoder()
        .inverse_transform(&indices)?
        .pop()
        .ok_or(PredictionError::UnexpectedOutputLength(0))
}
