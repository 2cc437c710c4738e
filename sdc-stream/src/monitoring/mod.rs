//! Monitoring reporter
//!
//! Off the request path: persists each observation, computes drift metrics
//! against the reference dataset and persists the snapshot. Runs inside the
//! monitor pool, which swallows every error returned here.

pub mod drift;
pub mod store;

pub use drift::{compute_snapshot, DriftReport};
pub use store::MetricsStore;

use async_trait::async_trait;
use sdc_common::events::Observation;
use sdc_common::{Features, PredictionResult};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::MonitoringError;

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(
        &self,
        reference: Option<&[Features]>,
        features: &Features,
        result: &PredictionResult,
    ) -> Result<(), MonitoringError>;
}

/// Test-mode reporter
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

#[async_trait]
impl Reporter for NoopReporter {
    async fn report(
        &self,
        _reference: Option<&[Features]>,
        _features: &Features,
        _result: &PredictionResult,
    ) -> Result<(), MonitoringError> {
        Ok(())
    }
}

/// Reporter backed by the SQLite metrics store
pub struct StoreReporter {
    store: MetricsStore,
    categorical: BTreeSet<String>,
}

impl StoreReporter {
    pub fn new(store: MetricsStore) -> Self {
        Self {
            store,
            categorical: BTreeSet::new(),
        }
    }

    /// Columns tested by category share (usually the model's categorical inputs)
    pub fn with_categorical_columns(mut self, columns: BTreeSet<String>) -> Self {
        self.categorical = columns;
        self
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }
}

#[async_trait]
impl Reporter for StoreReporter {
    async fn report(
        &self,
        reference: Option<&[Features]>,
        features: &Features,
        result: &PredictionResult,
    ) -> Result<(), MonitoringError> {
        let observation = Observation::new(features, &result.prediction.output, sdc_common::time::now());
        self.store.insert_observation(&observation).await?;

        // The raw observation is still worth keeping without a reference
        let reference = reference.ok_or(MonitoringError::NoReference)?;

        let report = DriftReport::compute(reference, &observation.values, &self.categorical);
        let snapshot = report.snapshot(observation.timestamp);
        if snapshot.drift_detected {
            warn!(
                student_id = %result.prediction.student_id,
                prediction = %result.prediction.output,
                p_value = snapshot.column_drift_metric,
                drifted_columns = ?report.drifted_columns().collect::<Vec<_>>(),
                "Drift detected"
            );
        } else {
            debug!(
                student_id = %result.prediction.student_id,
                drifted = snapshot.number_of_drifted_columns,
                "Metrics computed"
            );
        }

        self.store.insert_snapshot(&snapshot).await
    }
}
