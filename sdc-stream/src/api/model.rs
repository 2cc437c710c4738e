//! Loaded model metadata

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub model: String,
    pub version: String,
    pub features: Vec<String>,
    pub classes: Vec<String>,
    pub reference_rows: usize,
    pub emission_policy: String,
}

/// GET /model
pub async fn model_info(State(state): State<AppState>) -> Json<ModelInfo> {
    let dispatch = &state.dispatch;
    let bundle = dispatch.bundle();
    Json(ModelInfo {
        model: dispatch.model_name().to_string(),
        version: bundle.version_id().to_string(),
        features: bundle.model().feature_names(),
        classes: bundle.label_decoder().classes(),
        reference_rows: bundle.reference().map_or(0, <[_]>::len),
        emission_policy: dispatch.emission_policy().to_string(),
    })
}
