//! Drift and data-quality metrics for a single observation
//!
//! Every column present in both the reference dataset and the observation is
//! tested independently:
//! - numerical columns: empirical two-sided p-value of the observed value
//!   against the reference distribution
//! - categorical columns (`prediction`, every column the model declares
//!   categorical, and any column with text values): share of reference rows
//!   carrying the observed category
//!
//! A column drifts when its p-value falls below [`DRIFT_THRESHOLD`]. The
//! `prediction` column drives the headline `drift_detected` flag.

use chrono::{DateTime, Utc};
use sdc_common::events::PREDICTION_COLUMN;
use sdc_common::{FeatureValue, Features, MetricsSnapshot};
use std::collections::BTreeSet;

/// Significance level for the per-column tests
pub const DRIFT_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftTest {
    Empirical,
    CategoryShare,
    /// Null current value or no reference values
    NotTested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDrift {
    pub column: String,
    pub test: DriftTest,
    pub p_value: f64,
    pub drifted: bool,
}

/// Per-column drift results plus missing-value shares
#[derive(Debug, Clone, PartialEq)]
pub struct DriftReport {
    pub columns: Vec<ColumnDrift>,
    pub current_share_of_missing_values: f64,
    pub reference_share_of_missing_values: f64,
}

impl DriftReport {
    /// Compare one observation (features + prediction) against the reference
    ///
    /// `categorical` names columns tested by category share regardless of
    /// their value shape (label-encoded inputs arrive as numbers).
    pub fn compute(reference: &[Features], current: &Features, categorical: &BTreeSet<String>) -> Self {
        let reference_columns: BTreeSet<&str> = reference
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect();
        let shared: Vec<&str> = current
            .keys()
            .map(String::as_str)
            .filter(|c| reference_columns.contains(c))
            .collect();

        let columns = shared
            .iter()
            .map(|&column| column_drift(reference, current, column, categorical.contains(column)))
            .collect();

        Self {
            columns,
            current_share_of_missing_values: current_missing_share(current, &shared),
            reference_share_of_missing_values: reference_missing_share(reference, &shared),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDrift> {
        self.columns.iter().find(|c| c.column == name)
    }

    pub fn drifted_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter(|c| c.drifted).map(|c| c.column.as_str())
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>) -> MetricsSnapshot {
        let prediction = self.column(PREDICTION_COLUMN);
        MetricsSnapshot {
            drift_detected: prediction.is_some_and(|c| c.drifted),
            column_drift_metric: prediction.map_or(1.0, |c| c.p_value),
            number_of_drifted_columns: self.drifted_columns().count() as i64,
            current_share_of_missing_values: self.current_share_of_missing_values,
            reference_share_of_missing_values: self.reference_share_of_missing_values,
            timestamp,
        }
    }
}

/// Shortcut for [`DriftReport::compute`] followed by [`DriftReport::snapshot`]
pub fn compute_snapshot(
    reference: &[Features],
    current: &Features,
    categorical: &BTreeSet<String>,
    timestamp: DateTime<Utc>,
) -> MetricsSnapshot {
    DriftReport::compute(reference, current, categorical).snapshot(timestamp)
}

fn column_drift(
    reference: &[Features],
    current: &Features,
    column: &str,
    categorical: bool,
) -> ColumnDrift {
    let value = current.get(column).unwrap_or(&FeatureValue::Null);
    let observed: Vec<&FeatureValue> = reference
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|v| !v.is_null())
        .collect();

    let (test, p_value) = if value.is_null() || observed.is_empty() {
        (DriftTest::NotTested, 1.0)
    } else if !categorical && column != PREDICTION_COLUMN && is_numerical(value, &observed) {
        let mut sample: Vec<f64> = observed.iter().filter_map(|v| v.as_f64()).collect();
        sample.sort_by(f64::total_cmp);
        // is_numerical guarantees as_f64 succeeds
        let x = value.as_f64().unwrap_or_default();
        (DriftTest::Empirical, empirical_p_value(&sample, x))
    } else {
        (DriftTest::CategoryShare, category_share(value, &observed))
    };

    ColumnDrift {
        column: column.to_string(),
        test,
        p_value,
        drifted: p_value < DRIFT_THRESHOLD,
    }
}

fn is_numerical(value: &FeatureValue, observed: &[&FeatureValue]) -> bool {
    value.as_f64().is_some() && observed.iter().all(|v| v.as_f64().is_some())
}

/// `min(1, 2 * min(F(x), 1 - F⁻(x)))` over a sorted, non-empty sample
pub fn empirical_p_value(sorted: &[f64], x: f64) -> f64 {
    let n = sorted.len() as f64;
    let at_or_below = sorted.partition_point(|v| *v <= x) as f64;
    let below = sorted.partition_point(|v| *v < x) as f64;
    let lower = at_or_below / n;
    let upper = 1.0 - below / n;
    (2.0 * lower.min(upper)).min(1.0)
}

fn category_share(value: &FeatureValue, observed: &[&FeatureValue]) -> f64 {
    let key = value.category_key();
    let matches = observed.iter().filter(|v| v.category_key() == key).count();
    matches as f64 / observed.len() as f64
}

fn current_missing_share(current: &Features, shared: &[&str]) -> f64 {
    if shared.is_empty() {
        return 0.0;
    }
    let missing = shared
        .iter()
        .filter(|&&c| current.get(c).map_or(true, FeatureValue::is_null))
        .count();
    missing as f64 / shared.len() as f64
}

fn reference_missing_share(reference: &[Features], shared: &[&str]) -> f64 {
    let cells = reference.len() * shared.len();
    if cells == 0 {
        return 0.0;
    }
    let missing: usize = reference
        .iter()
        .map(|row| {
            shared
                .iter()
                .filter(|&&c| row.get(c).map_or(true, FeatureValue::is_null))
                .count()
        })
        .sum();
    missing as f64 / cells as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numerical() -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn row(approved: Option<f64>, prediction: &str) -> Features {
        let mut f = Features::new();
        f.insert(
            "Curricular units 2nd sem (approved)".into(),
            approved.map_or(FeatureValue::Null, FeatureValue::Number),
        );
        f.insert(PREDICTION_COLUMN.into(), prediction.into());
        f
    }

    fn reference() -> Vec<Features> {
        (0..20)
            .map(|i| row(Some(i as f64 % 10.0), if i % 2 == 0 { "Graduate" } else { "Dropout" }))
            .collect()
    }

    #[test]
    fn test_empirical_p_value() {
        let sample: Vec<f64> = (0..10).map(f64::from).collect();
        // Median-ish value is not significant
        assert!(empirical_p_value(&sample, 4.5) > 0.5);
        // Outside the observed range on either side
        assert_eq!(empirical_p_value(&sample, 100.0), 0.0);
        assert_eq!(empirical_p_value(&sample, -1.0), 0.0);
        // Constant reference equal to the observation
        assert_eq!(empirical_p_value(&[3.0, 3.0, 3.0], 3.0), 1.0);
    }

    #[test]
    fn test_in_distribution_observation_does_not_drift() {
        let snapshot = compute_snapshot(&reference(), &row(Some(5.0), "Graduate"), &numerical(), Utc::now());
        assert!(!snapshot.drift_detected);
        assert_eq!(snapshot.column_drift_metric, 0.5);
        assert_eq!(snapshot.number_of_drifted_columns, 0);
        assert_eq!(snapshot.current_share_of_missing_values, 0.0);
        assert_eq!(snapshot.reference_share_of_missing_values, 0.0);
    }

    #[test]
    fn test_unseen_prediction_drifts() {
        let report = DriftReport::compute(&reference(), &row(Some(50.0), "Enrolled"), &numerical());
        let snapshot = report.snapshot(Utc::now());

        assert!(snapshot.drift_detected);
        assert_eq!(snapshot.column_drift_metric, 0.0);
        assert_eq!(snapshot.number_of_drifted_columns, 2);
        assert_eq!(
            report.column("Curricular units 2nd sem (approved)").unwrap().test,
            DriftTest::Empirical
        );
        assert_eq!(report.column(PREDICTION_COLUMN).unwrap().test, DriftTest::CategoryShare);
    }

    #[test]
    fn test_missing_value_shares() {
        let mut reference = reference();
        reference[0] = row(None, "Graduate");
        reference[1].remove(PREDICTION_COLUMN);

        let snapshot = compute_snapshot(&reference, &row(None, "Graduate"), &numerical(), Utc::now());
        // 2 missing cells out of 20 rows × 2 columns
        assert_eq!(snapshot.reference_share_of_missing_values, 0.05);
        assert_eq!(snapshot.current_share_of_missing_values, 0.5);
    }

    #[test]
    fn test_null_current_value_is_not_tested() {
        let report = DriftReport::compute(&reference(), &row(None, "Graduate"), &numerical());
        let column = report.column("Curricular units 2nd sem (approved)").unwrap();
        assert_eq!(column.test, DriftTest::NotTested);
        assert!(!column.drifted);
    }

    #[test]
    fn test_columns_outside_reference_are_ignored() {
        let mut current = row(Some(5.0), "Graduate");
        current.insert("Unseen column".into(), 1e9.into());
        let report = DriftReport::compute(&reference(), &current, &numerical());
        assert!(report.column("Unseen column").is_none());
        assert_eq!(report.columns.len(), 2);
    }

    #[test]
    fn test_reference_without_prediction_column() {
        let reference: Vec<Features> = reference()
            .into_iter()
            .map(|mut r| {
                r.remove(PREDICTION_COLUMN);
                r
            })
            .collect();
        let snapshot = compute_snapshot(&reference, &row(Some(5.0), "Graduate"), &numerical(), Utc::now());
        assert!(!snapshot.drift_detected);
        assert_eq!(snapshot.column_drift_metric, 1.0);
    }

    #[test]
    fn test_mixed_type_column_falls_back_to_categories() {
        let mut reference = reference();
        reference[0].insert("Curricular units 2nd sem (approved)".into(), "n/a".into());
        let report = DriftReport::compute(&reference, &row(Some(5.0), "Graduate"), &numerical());
        assert_eq!(
            report.column("Curricular units 2nd sem (approved)").unwrap().test,
            DriftTest::CategoryShare
        );
    }

    #[test]
    fn test_declared_categorical_column_uses_category_share() {
        let reference: Vec<Features> = (0..100)
            .map(|i| {
                let mut f = Features::new();
                f.insert("Scholarship holder".into(), FeatureValue::Number(if i < 3 { 1.0 } else { 0.0 }));
                f
            })
            .collect();
        let mut current = Features::new();
        current.insert("Scholarship holder".into(), FeatureValue::Number(1.0));

        // Treated as a number, a rare 1 is not significant
        let as_number = DriftReport::compute(&reference, &current, &numerical());
        let column = as_number.column("Scholarship holder").unwrap();
        assert_eq!(column.test, DriftTest::Empirical);
        assert!(!column.drifted);

        let categorical: BTreeSet<String> = ["Scholarship holder".to_string()].into();
        let as_category = DriftReport::compute(&reference, &current, &categorical);
        let column = as_category.column("Scholarship holder").unwrap();
        assert_eq!(column.test, DriftTest::CategoryShare);
        assert!((column.p_value - 0.03).abs() < 1e-12);
        assert!(column.drifted);
    }
}
