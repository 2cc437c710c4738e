//! Wire types for the prediction stream
//!
//! Shared by the streaming service and by anything that produces or consumes
//! its records:
//! - Inbound: a Kinesis-style batch whose records carry base64-encoded
//!   [`InboundEvent`] JSON
//! - Outbound: [`BatchResponse`] with one [`PredictionSlot`] per inbound record
//! - Monitoring: [`Observation`] and [`MetricsSnapshot`] rows persisted by the
//!   monitoring reporter

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the column holding the model output in monitoring rows
pub const PREDICTION_COLUMN: &str = "prediction";

/// Student identifier as carried on the wire
///
/// Producers send integers; string identifiers are accepted as well so the
/// partition key can be derived from either form. Integral floats (`256.0`)
/// become numbers; unsigned values beyond `i64` and fractional floats keep
/// their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum StudentId {
    Number(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for StudentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(StudentIdVisitor)
    }
}

struct StudentIdVisitor;

impl<'de> Visitor<'de> for StudentIdVisitor {
    type Value = StudentId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string student id")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<StudentId, E> {
        Ok(StudentId::Number(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<StudentId, E> {
        Ok(i64::try_from(value)
            .map(StudentId::Number)
            .unwrap_or_else(|_| StudentId::Text(value.to_string())))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<StudentId, E> {
        if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
            Ok(StudentId::Number(value as i64))
        } else if value.is_finite() {
            Ok(StudentId::Text(value.to_string()))
        } else {
            Err(E::invalid_value(de::Unexpected::Float(value), &self))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<StudentId, E> {
        Ok(StudentId::Text(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<StudentId, E> {
        Ok(StudentId::Text(value))
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudentId::Number(n) => write!(f, "{}", n),
            StudentId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for StudentId {
    fn from(value: i64) -> Self {
        StudentId::Number(value)
    }
}

impl From<i32> for StudentId {
    fn from(value: i32) -> Self {
        StudentId::Number(i64::from(value))
    }
}

/// A single feature cell: numeric, boolean, categorical or missing
///
/// Booleans count as 1/0 wherever a number is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl FeatureValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            FeatureValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Category key used when the value is compared as a label
    pub fn category_key(&self) -> Option<String> {
        match self {
            FeatureValue::Number(n) => Some(n.to_string()),
            FeatureValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            FeatureValue::Text(s) => Some(s.clone()),
            FeatureValue::Null => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        FeatureValue::Text(value.to_string())
    }
}

/// Feature name → value mapping for one student (ordered for stable output)
pub type Features = BTreeMap<String, FeatureValue>;

/// Decoded inference request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub student_features: Features,
    pub student_id: StudentId,
}

/// Model output for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub output: String,
    pub student_id: StudentId,
}

/// Prediction event returned to the caller and published downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub model: String,
    pub version: String,
    pub prediction: Prediction,
}

impl PredictionResult {
    pub fn new(
        model: impl Into<String>,
        version: impl Into<String>,
        output: impl Into<String>,
        student_id: StudentId,
    ) -> Self {
        Self {
            model: model.into(),
            version: version.into(),
            prediction: Prediction {
                output: output.into(),
                student_id,
            },
        }
    }

    /// Partition key for the downstream stream (string form of `student_id`)
    pub fn partition_key(&self) -> String {
        self.prediction.student_id.to_string()
    }
}

// ============================================================================
// Inbound batch (Kinesis trigger shape)
// ============================================================================

/// Batch of stream records delivered to the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub kinesis: KinesisPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinesisPayload {
    /// base64-encoded [`InboundEvent`] JSON
    pub data: String,
}

impl StreamBatch {
    /// Build a batch from already-encoded payloads
    pub fn from_encoded<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: payloads
                .into_iter()
                .map(|data| StreamRecord {
                    kinesis: KinesisPayload { data: data.into() },
                })
                .collect(),
        }
    }
}

// ============================================================================
// Outbound batch response
// ============================================================================

/// Stage at which an event failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Decode,
    Prediction,
    Emission,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Decode => "decode",
            FailureKind::Prediction => "prediction",
            FailureKind::Emission => "emission",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotError {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErroredSlot {
    pub error: SlotError,
}

/// Outcome for one inbound record
///
/// Serialized untagged: a completed slot is exactly a [`PredictionResult`],
/// an errored slot is `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionSlot {
    Completed(PredictionResult),
    Errored(ErroredSlot),
}

impl PredictionSlot {
    pub fn errored(kind: FailureKind, message: impl Into<String>) -> Self {
        PredictionSlot::Errored(ErroredSlot {
            error: SlotError {
                kind,
                message: message.into(),
            },
        })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PredictionSlot::Completed(_))
    }

    pub fn result(&self) -> Option<&PredictionResult> {
        match self {
            PredictionSlot::Completed(result) => Some(result),
            PredictionSlot::Errored(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PredictionSlot::Completed(_) => None,
            PredictionSlot::Errored(slot) => Some(slot.error.kind),
        }
    }
}

/// Response for one inbound batch, order-preserving
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub predictions: Vec<PredictionSlot>,
}

// ============================================================================
// Monitoring rows
// ============================================================================

/// Raw observation persisted to `historical_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Features plus the `prediction` column
    pub values: Features,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(features: &Features, output: &str, timestamp: DateTime<Utc>) -> Self {
        let mut values = features.clone();
        values.insert(
            PREDICTION_COLUMN.to_string(),
            FeatureValue::Text(output.to_string()),
        );
        Self { values, timestamp }
    }
}

/// Drift/quality snapshot persisted to `evidently_metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub drift_detected: bool,
    pub column_drift_metric: f64,
    pub number_of_drifted_columns: i64,
    pub current_share_of_missing_values: f64,
    pub reference_share_of_missing_values: f64,
    pub timestamp: DateTime<Utc>,
}
