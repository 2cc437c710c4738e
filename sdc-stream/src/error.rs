//! Error types for sdc-stream
//!
//! One enum per failure domain so the dispatch core can decide, per variant,
//! whether a failure is fatal, lands in an event's result slot, or is only
//! logged:
//! - [`ArtifactLoadError`]: fatal at startup
//! - [`DecodeError`], [`PredictionError`]: isolated to one event's slot
//! - [`EmissionError`]: isolated to one event's slot (or logged, per policy)
//! - [`MonitoringError`]: logged by the monitor pool, never surfaced

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed transport payload for a single event
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Feature schema mismatch or model invocation failure for a single event
#[derive(Debug, Error, PartialEq)]
pub enum PredictionError {
    #[error("missing required feature '{0}'")]
    MissingFeature(String),

    #[error("feature '{0}' is null")]
    NullFeature(String),

    #[error("feature '{feature}' has unknown category '{value}'")]
    UnknownCategory { feature: String, value: String },

    #[error("feature '{feature}' expects a numeric value")]
    NotNumeric { feature: String },

    #[error("class index {index} outside label encoder range ({classes} classes)")]
    ClassOutOfRange { index: usize, classes: usize },

    #[error("model returned {0} predictions for a single-row frame")]
    UnexpectedOutputLength(usize),

    #[error("model error: {0}")]
    Model(String),
}

/// Model or encoder could not be resolved or deserialized
#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid model artifact: {0}")]
    InvalidModel(String),

    #[error("no version of model '{name}' in stage '{stage}'")]
    NoVersion { name: String, stage: String },

    #[error("model registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model registry returned {status} for {url}")]
    Registry { status: u16, url: String },

    #[error("registry lookup requires a tracking URI (set MLFLOW_TRACKING_URI or MODEL_LOCATION)")]
    NoRegistry,

    #[error("run id unknown for {0}; set ARTIFACT_LOCATION or record run_id in model.json")]
    MissingRunId(PathBuf),
}

/// Downstream publish failure
#[derive(Debug, Error)]
pub enum EmissionError {
    #[error("failed to serialize prediction: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("stream request failed: {0}")]
    Transport(String),

    #[error("stream rejected record with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Monitoring path failure (always swallowed by the monitor pool)
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("metrics store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("metrics store error: {0}")]
    Common(#[from] sdc_common::Error),

    #[error("no reference dataset loaded; drift metrics skipped")]
    NoReference,
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
