//! sdc-stream library - streaming student-dropout inference
//!
//! Loads a trained classifier once, then turns batches of base64-encoded
//! student events into predictions. Each prediction is published to the
//! downstream stream on the request path and handed to a bounded background
//! pool for drift monitoring.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod artifacts;
pub mod config;
pub mod decode;
pub mod dispatch;
pub mod emit;
pub mod error;
pub mod monitoring;
pub mod predict;

pub use dispatch::DispatchCore;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatch: Arc<DispatchCore>,
    /// Emission and monitoring disabled
    pub test_run: bool,
}

impl AppState {
    pub fn new(dispatch: Arc<DispatchCore>, test_run: bool) -> Self {
        Self { dispatch, test_run }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/invocations", post(api::invoke))
        .route("/model", get(api::model_info))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
