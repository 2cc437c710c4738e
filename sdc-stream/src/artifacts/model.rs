//! Classifier abstraction and the serialized linear classifier
//!
//! `model.json` layout:
//!
//! ```json
//! {
//!   "run_id": "d3c84a6e43d3476cb774b9b28a73b527",
//!   "classifier": {
//!     "type": "linear",
//!     "features": [
//!       {"name": "GDP"},
//!       {"name": "Course", "kind": "categorical", "categories": ["Nursing", "Management"]}
//!     ],
//!     "coefficients": [[0.1, -0.2], [0.3, 0.0], [-0.4, 0.2]],
//!     "intercepts": [0.0, 0.1, -0.1]
//!   }
//! }
//! ```

use sdc_common::{FeatureValue, Features};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ArtifactLoadError, PredictionError};

/// Tabular input handed to a classifier (one row per student)
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    rows: Vec<Features>,
}

impl FeatureFrame {
    /// Single-row frame for one inference request
    pub fn single(features: &Features) -> Self {
        Self {
            rows: vec![features.clone()],
        }
    }

    pub fn from_rows(rows: Vec<Features>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Features] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A trained model producing one raw class index per frame row
pub trait Classifier: Send + Sync {
    fn predict(&self, frame: &FeatureFrame) -> Result<Vec<usize>, PredictionError>;

    /// Input columns in model order (used to lay out monitoring tables)
    fn feature_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Inputs declared categorical, even when they arrive label-encoded
    fn categorical_features(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// On-disk model artifact
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelArtifact {
    /// Training run that produced the model
    #[serde(default)]
    pub run_id: Option<String>,
    pub classifier: ClassifierSpec,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierSpec {
    Linear(LinearClassifier),
}

impl ClassifierSpec {
    /// Validate and box the classifier
    pub fn into_classifier(self) -> Result<Box<dyn Classifier>, ArtifactLoadError> {
        match self {
            ClassifierSpec::Linear(model) => {
                model.validate()?;
                Ok(Box::new(model))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    #[default]
    Numerical,
    Categorical,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub kind: FeatureKind,
    /// Category levels; a level is encoded as its index. Empty means the
    /// categorical column already arrives label-encoded.
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Multinomial linear classifier: `argmax_k (intercepts[k] + coefficients[k] · x)`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinearClassifier {
    pub features: Vec<FeatureSpec>,
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl LinearClassifier {
    pub fn validate(&self) -> Result<(), ArtifactLoadError> {
        if self.features.is_empty() {
            return Err(ArtifactLoadError::InvalidModel("no input features".into()));
        }
        if self.coefficients.is_empty() {
            return Err(ArtifactLoadError::InvalidModel("no classes".into()));
        }
        if self.coefficients.len() != self.intercepts.len() {
            return Err(ArtifactLoadError::InvalidModel(format!(
                "{} coefficient rows but {} intercepts",
                self.coefficients.len(),
                self.intercepts.len()
            )));
        }
        if let Some((class, row)) = self
            .coefficients
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.features.len())
        {
            return Err(ArtifactLoadError::InvalidModel(format!(
                "class {} has {} coefficients for {} features",
                class,
                row.len(),
                self.features.len()
            )));
        }
        Ok(())
    }

    fn encode_row(&self, row: &Features) -> Result<Vec<f64>, PredictionError> {
        self.features
            .iter()
            .map(|spec| {
                let value = row
                    .get(&spec.name)
                    .ok_or_else(|| PredictionError::MissingFeature(spec.name.clone()))?;
                encode_value(spec, value)
            })
            .collect()
    }

    fn predict_row(&self, row: &Features) -> Result<usize, PredictionError> {
        let x = self.encode_row(row)?;

        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (class, (weights, intercept)) in
            self.coefficients.iter().zip(&self.intercepts).enumerate()
        {
            let score = intercept + weights.iter().zip(&x).map(|(w, v)| w * v).sum::<f64>();
            // Strict comparison keeps the lowest index on ties
            if score > best_score {
                best = class;
                best_score = score;
            }
        }

        if best_score == f64::NEG_INFINITY {
            return Err(PredictionError::Model("no finite class score".into()));
        }
        Ok(best)
    }
}

fn encode_value(spec: &FeatureSpec, value: &FeatureValue) -> Result<f64, PredictionError> {
    match (spec.kind, value) {
        (_, FeatureValue::Null) => Err(PredictionError::NullFeature(spec.name.clone())),
        (FeatureKind::Numerical, FeatureValue::Number(n)) => Ok(*n),
        (FeatureKind::Numerical, FeatureValue::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        (FeatureKind::Numerical, FeatureValue::Text(s)) => {
            s.trim().parse::<f64>().map_err(|_| PredictionError::NotNumeric {
                feature: spec.name.clone(),
            })
        }
        (FeatureKind::Categorical, FeatureValue::Number(_) | FeatureValue::Bool(_))
            if spec.categories.is_empty() =>
        {
            Ok(value.as_f64().unwrap_or_default())
        }
        (FeatureKind::Categorical, other) => {
            let key = other.category_key().unwrap_or_default();
            spec.categories
                .iter()
                .position(|c| *c == key)
                .map(|i| i as f64)
                .ok_or_else(|| PredictionError::UnknownCategory {
                    feature: spec.name.clone(),
                    value: key,
                })
        }
    }
}

impl Classifier for LinearClassifier {
    fn predict(&self, frame: &FeatureFrame) -> Result<Vec<usize>, PredictionError> {
        frame.rows().iter().map(|row| self.predict_row(row)).collect()
    }

    fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    fn categorical_features(&self) -> BTreeSet<String> {
        self.features
            .iter()
            .filter(|f| f.kind == FeatureKind::Categorical)
            .map(|f| f.name.clone())
            .collect()
    }
}
