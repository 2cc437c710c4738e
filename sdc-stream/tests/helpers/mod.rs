//! Test doubles for sdc-stream integration tests
//!
//! - Fixed-output model and label decoder
//! - Recording emitter with optional per-student failures
//! - Scripted reporters (count, fail, panic, block until released)
//! - The producer fixture for student 256

#![allow(dead_code)]

use async_trait::async_trait;
use sdc_common::events::StreamBatch;
use sdc_common::{FeatureValue, Features, InboundEvent, PredictionResult, StudentId};
use sdc_stream::artifacts::{ArtifactBundle, Classifier, FeatureFrame, LabelDecoder};
use sdc_stream::dispatch::{DispatchCore, EmissionPolicy, PoolSettings, SideEffects};
use sdc_stream::emit::Emitter;
use sdc_stream::error::{EmissionError, MonitoringError, PredictionError};
use sdc_stream::monitoring::Reporter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const MODEL_NAME: &str = "student-dropout-classifier";
pub const VERSION: &str = "123";

/// Producer payload for student 256
pub const STUDENT_256: &str = "eyJzdHVkZW50X2ZlYXR1cmVzIjogeyJHRFAiOiAxLjc0LCAiSW5mbGF0aW9uIHJhdGUiOiAxLjQsICJUdWl0aW9uIGZlZXMgdXAgdG8gZGF0ZSI6IDEsICJTY2hvbGFyc2hpcCBob2xkZXIiOiAwLCAiQ3VycmljdWxhciB1bml0cyAxc3Qgc2VtIChhcHByb3ZlZCkiOiA1LCAiQ3VycmljdWxhciB1bml0cyAxc3Qgc2VtIChlbnJvbGxlZCkiOiA2LCAiQ3VycmljdWxhciB1bml0cyAybmQgc2VtIChhcHByb3ZlZCkiOiA1fSwgInN0dWRlbnRfaWQiOiAyNTZ9";

// ============================================================================
// Model doubles
// ============================================================================

/// Always predicts class 1; fails when `GDP` is absent
pub struct FixedModel;

impl Classifier for FixedModel {
    fn predict(&self, frame: &FeatureFrame) -> Result<Vec<usize>, PredictionError> {
        frame
            .rows()
            .iter()
            .map(|row| {
                if row.contains_key("GDP") {
                    Ok(1)
                } else {
                    Err(PredictionError::MissingFeature("GDP".into()))
                }
            })
            .collect()
    }

    fn feature_names(&self) -> Vec<String> {
        vec!["GDP".to_string()]
    }
}

/// Maps every index to "Graduate"
pub struct GraduateDecoder;

impl LabelDecoder for GraduateDecoder {
    fn inverse_transform(&self, indices: &[usize]) -> Result<Vec<String>, PredictionError> {
        Ok(indices.iter().map(|_| "Graduate".to_string()).collect())
    }

    fn classes(&self) -> Vec<String> {
        vec!["Dropout".to_string(), "Graduate".to_string()]
    }
}

pub fn bundle() -> Arc<ArtifactBundle> {
    Arc::new(ArtifactBundle::new(
        Box::new(FixedModel),
        Box::new(GraduateDecoder),
        None,
        VERSION,
    ))
}

// ============================================================================
// Side-effect doubles
// ============================================================================

/// Records every emitted result; rejects the listed students
#[derive(Default)]
pub struct RecordingEmitter {
    pub emitted: Mutex<Vec<PredictionResult>>,
    pub failing: Vec<StudentId>,
}

impl RecordingEmitter {
    pub fn failing_for(ids: &[i64]) -> Self {
        Self {
            emitted: Mutex::new(Vec::new()),
            failing: ids.iter().map(|&id| StudentId::Number(id)).collect(),
        }
    }

    pub fn emitted_ids(&self) -> Vec<StudentId> {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prediction.student_id.clone())
            .collect()
    }
}

#[async_trait]
impl Emitter for RecordingEmitter {
    async fn emit(&self, result: &PredictionResult) -> Result<(), EmissionError> {
        if self.failing.contains(&result.prediction.student_id) {
            return Err(EmissionError::Rejected {
                status: 500,
                body: "InternalFailure".into(),
            });
        }
        self.emitted.lock().unwrap().push(result.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ReporterMode {
    Succeed,
    Fail,
    Panic,
    /// Wait until [`ScriptedReporter::release`]
    Block,
}

pub struct ScriptedReporter {
    pub mode: ReporterMode,
    pub calls: AtomicUsize,
    gate: Semaphore,
}

impl ScriptedReporter {
    pub fn new(mode: ReporterMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Let blocked reports finish
    pub fn release(&self) {
        // Each report returns the permit, so one lets every waiter through
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Reporter for ScriptedReporter {
    async fn report(
        &self,
        _reference: Option<&[Features]>,
        _features: &Features,
        _result: &PredictionResult,
    ) -> Result<(), MonitoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            ReporterMode::Succeed => Ok(()),
            ReporterMode::Fail => Err(MonitoringError::NoReference),
            ReporterMode::Panic => panic!("reporter blew up"),
            ReporterMode::Block => {
                let _permit = self.gate.acquire().await;
                Ok(())
            }
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn dispatch_core(side_effects: SideEffects, policy: EmissionPolicy) -> DispatchCore {
    DispatchCore::new(
        bundle(),
        MODEL_NAME,
        side_effects,
        policy,
        PoolSettings {
            max_in_flight: 64,
            job_timeout: Duration::from_secs(5),
        },
    )
}

pub fn event(student_id: i64, gdp: Option<f64>) -> InboundEvent {
    let mut features = Features::new();
    features.insert("Inflation rate".into(), FeatureValue::Number(1.4));
    if let Some(gdp) = gdp {
        features.insert("GDP".into(), FeatureValue::Number(gdp));
    }
    InboundEvent {
        student_features: features,
        student_id: StudentId::Number(student_id),
    }
}

pub fn batch(events: &[InboundEvent]) -> StreamBatch {
    StreamBatch::from_encoded(
        events
            .iter()
            .map(|e| sdc_stream::decode::encode(e).expect("event encodes")),
    )
}
