//! Batch inference endpoint
//!
//! `POST /invocations` takes a stream batch (`{"Records": [...]}`) and
//! returns one prediction slot per record. Per-record failures are reported
//! inside the slots; only an unparseable body is an HTTP error.

use axum::{body::Bytes, extract::State, Json};
use sdc_common::events::{BatchResponse, StreamBatch};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /invocations
pub async fn invoke(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<BatchResponse>> {
    let batch: StreamBatch = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, bytes = body.len(), "Rejected malformed batch");
        ApiError::BadRequest(format!("invalid stream batch: {}", e))
    })?;

    Ok(Json(state.dispatch.handle_batch(&batch).await))
}
