//! # SDC Common Library
//!
//! Shared code for the student-dropout-classifier services including:
//! - Wire types for inbound stream batches and outbound predictions
//! - Monitoring data contracts (observations, metrics snapshots)
//! - Configuration loading and layered setting resolution
//! - Metrics store initialization and schema synchronization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{
    FeatureValue, Features, InboundEvent, MetricsSnapshot, Observation, PredictionResult, StudentId,
};
