//! Dispatch core
//!
//! Drives each inbound record through decode → predict → fan-out and folds
//! the outcome into one [`PredictionSlot`]. Records are handled in input order
//! so per-student emission order follows stream order.
//!
//! ```text
//! Decoded ──► Predicted ──► Dispatched ──► Completed
//!    │            │              │
//!    └────────────┴──────────────┴──► Errored(kind)
//! ```
//!
//! Fan-out per event:
//! - emission: awaited on the request path, outcome governed by [`EmissionPolicy`]
//! - monitoring: handed to the [`MonitorPool`], never awaited

pub mod monitor_pool;

pub use monitor_pool::{MonitorJob, MonitorPool, MonitorStats};

use sdc_common::events::{BatchResponse, FailureKind, PredictionSlot, StreamBatch};
use sdc_common::{InboundEvent, PredictionResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactBundle;
use crate::decode::decode;
use crate::emit::{Emitter, NoopEmitter};
use crate::monitoring::{NoopReporter, Reporter};
use crate::predict::predict;

/// What an emission failure does to the event's slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionPolicy {
    /// The slot becomes `Errored(emission)`
    #[default]
    Propagate,
    /// Logged only; the slot keeps its prediction
    BestEffort,
}

impl fmt::Display for EmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmissionPolicy::Propagate => f.write_str("propagate"),
            EmissionPolicy::BestEffort => f.write_str("best_effort"),
        }
    }
}

impl std::str::FromStr for EmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "propagate" => Ok(EmissionPolicy::Propagate),
            "best_effort" => Ok(EmissionPolicy::BestEffort),
            other => Err(format!("unknown emission policy '{}'", other)),
        }
    }
}

/// Per-event stage, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStage {
    Decoded,
    Predicted,
    Dispatched,
    Completed,
    Errored(FailureKind),
}

impl fmt::Display for EventStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStage::Decoded => f.write_str("decoded"),
            EventStage::Predicted => f.write_str("predicted"),
            EventStage::Dispatched => f.write_str("dispatched"),
            EventStage::Completed => f.write_str("completed"),
            EventStage::Errored(kind) => write!(f, "errored({})", kind),
        }
    }
}

/// Side-effect collaborators, chosen once at startup
#[derive(Clone)]
pub struct SideEffects {
    pub emitter: Arc<dyn Emitter>,
    pub reporter: Arc<dyn Reporter>,
}

impl SideEffects {
    /// Test mode: no emission, no monitoring
    pub fn disabled() -> Self {
        Self {
            emitter: Arc::new(NoopEmitter),
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn live(emitter: Arc<dyn Emitter>, reporter: Arc<dyn Reporter>) -> Self {
        Self { emitter, reporter }
    }
}

/// Monitor pool sizing
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_in_flight: usize,
    pub job_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            job_timeout: Duration::from_secs(30),
        }
    }
}

pub struct DispatchCore {
    bundle: Arc<ArtifactBundle>,
    model_name: String,
    emitter: Arc<dyn Emitter>,
    monitor_pool: MonitorPool,
    emission_policy: EmissionPolicy,
}

impl DispatchCore {
    pub fn new(
        bundle: Arc<ArtifactBundle>,
        model_name: impl Into<String>,
        side_effects: SideEffects,
        emission_policy: EmissionPolicy,
        pool: PoolSettings,
    ) -> Self {
        let monitor_pool = MonitorPool::new(side_effects.reporter, pool.max_in_flight, pool.job_timeout);
        Self {
            bundle,
            model_name: model_name.into(),
            emitter: side_effects.emitter,
            monitor_pool,
            emission_policy,
        }
    }

    pub fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn emission_policy(&self) -> EmissionPolicy {
        self.emission_policy
    }

    pub fn monitor_pool(&self) -> &MonitorPool {
        &self.monitor_pool
    }

    /// One slot per record, in record order
    pub async fn handle_batch(&self, batch: &StreamBatch) -> BatchResponse {
        let batch_id = Uuid::new_v4();
        debug!(batch_id = %batch_id, records = batch.records.len(), "Handling batch");

        let mut predictions = Vec::with_capacity(batch.records.len());
        for (index, record) in batch.records.iter().enumerate() {
            let slot = self.handle_record(&record.kinesis.data).await;
            if let Some(kind) = slot.failure_kind() {
                debug!(batch_id = %batch_id, index, stage = %EventStage::Errored(kind), "Record errored");
            }
            predictions.push(slot);
        }

        let errored = predictions.iter().filter(|s| !s.is_completed()).count();
        info!(
            batch_id = %batch_id,
            records = predictions.len(),
            errored,
            "Batch handled"
        );
        BatchResponse { predictions }
    }

    /// Run one encoded record through the pipeline
    pub async fn handle_record(&self, data: &str) -> PredictionSlot {
        let event = match decode(data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to decode record");
                return PredictionSlot::errored(FailureKind::Decode, e.to_string());
            }
        };
        debug!(student_id = %event.student_id, stage = %EventStage::Decoded, "Record decoded");

        self.handle_event(event).await
    }

    /// Predict and fan out an already-decoded event
    pub async fn handle_event(&self, event: InboundEvent) -> PredictionSlot {
        let InboundEvent {
            student_features,
            student_id,
        } = event;

        let output = match predict(&self.bundle, &student_features) {
            Ok(output) => output,
            Err(e) => {
                warn!(student_id = %student_id, error = %e, "Prediction failed");
                return PredictionSlot::errored(FailureKind::Prediction, e.to_string());
            }
        };
        debug!(student_id = %student_id, output = %output, stage = %EventStage::Predicted, "Prediction made");

        let result = PredictionResult::new(
            self.model_name.as_str(),
            self.bundle.version_id(),
            output,
            student_id,
        );

        // Monitoring sees the result whatever happens to emission
        let monitored = self.monitor_pool.submit(MonitorJob {
            bundle: Arc::clone(&self.bundle),
            features: student_features,
            result: result.clone(),
        });
        debug!(
            student_id = %result.prediction.student_id,
            monitored,
            stage = %EventStage::Dispatched,
            "Monitoring submitted"
        );

        if let Err(e) = self.emitter.emit(&result).await {
            match self.emission_policy {
                EmissionPolicy::Propagate => {
                    return PredictionSlot::errored(FailureKind::Emission, e.to_string());
                }
                EmissionPolicy::BestEffort => {
                    warn!(
                        student_id = %result.prediction.student_id,
                        error = %e,
                        "Emission failed; keeping prediction (best_effort)"
                    );
                }
            }
        }
        debug!(student_id = %result.prediction.student_id, stage = %EventStage::Completed, "Event completed");

        PredictionSlot::Completed(result)
    }

    /// Wait (bounded) for in-flight monitoring jobs
    pub async fn drain(&self, limit: Duration) -> bool {
        let drained = self.monitor_pool.flush(limit).await;
        let stats = self.monitor_pool.stats();
        if drained {
            info!(?stats, "Monitor pool drained");
        } else {
            warn!(?stats, "Monitor pool did not drain in time");
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emission_policy_parsing() {
        assert_eq!("propagate".parse::<EmissionPolicy>().unwrap(), EmissionPolicy::Propagate);
        assert_eq!("best-effort".parse::<EmissionPolicy>().unwrap(), EmissionPolicy::BestEffort);
        assert_eq!(" BEST_EFFORT ".parse::<EmissionPolicy>().unwrap(), EmissionPolicy::BestEffort);
        assert!("sometimes".parse::<EmissionPolicy>().is_err());
        assert_eq!(EmissionPolicy::default(), EmissionPolicy::Propagate);
    }

    #[test]
    fn test_emission_policy_serde() {
        let policy: EmissionPolicy = serde_json::from_str("\"best_effort\"").unwrap();
        assert_eq!(policy, EmissionPolicy::BestEffort);
        assert_eq!(serde_json::to_string(&EmissionPolicy::Propagate).unwrap(), "\"propagate\"");
    }

    #[test]
    fn test_event_stage_display() {
        assert_eq!(EventStage::Errored(FailureKind::Emission).to_string(), "errored(emission)");
        assert_eq!(EventStage::Completed.to_string(), "completed");
    }
}
