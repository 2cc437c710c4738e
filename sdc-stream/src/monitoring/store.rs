//! Metrics store (SQLite)
//!
//! Tables:
//! - `historical_data`: one column per feature, plus `prediction` and `timestamp`
//! - `evidently_metrics`: one row per [`MetricsSnapshot`]
//!
//! Feature columns use NUMERIC affinity so numbers are stored as numbers and
//! categorical labels stay text. Columns seen for the first time in an
//! observation are added on the fly.

use sdc_common::db::{quote_ident, ColumnDefinition, SchemaSync, TableDefinition};
use sdc_common::events::{MetricsSnapshot, Observation, PREDICTION_COLUMN};
use sdc_common::time::to_storage_string;
use sdc_common::FeatureValue;
use sqlx::sqlite::SqliteArguments;
use sqlx::query::Query;
use sqlx::{Sqlite, SqlitePool};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::MonitoringError;

pub const HISTORICAL_TABLE: &str = "historical_data";
pub const METRICS_TABLE: &str = "evidently_metrics";
const TIMESTAMP_COLUMN: &str = "timestamp";

pub struct MetricsStore {
    pool: SqlitePool,
    /// Columns known to exist in `historical_data`
    historical_columns: Mutex<BTreeSet<String>>,
}

impl MetricsStore {
    /// Create or synchronize both tables for the given feature set
    pub async fn open(pool: SqlitePool, feature_names: &[String]) -> Result<Self, MonitoringError> {
        let mut columns: BTreeSet<String> = feature_names.iter().cloned().collect();
        columns.insert(PREDICTION_COLUMN.to_string());

        SchemaSync::ensure_table(&pool, &historical_table(&columns)).await?;
        SchemaSync::ensure_table(&pool, &metrics_table()).await?;

        info!(
            features = feature_names.len(),
            "Metrics store ready ({}, {})",
            HISTORICAL_TABLE,
            METRICS_TABLE
        );

        Ok(Self {
            pool,
            historical_columns: Mutex::new(columns),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist one raw observation (features + prediction)
    pub async fn insert_observation(&self, observation: &Observation) -> Result<(), MonitoringError> {
        self.ensure_columns(observation.values.keys()).await?;

        let mut names: Vec<String> = observation.values.keys().map(|k| quote_ident(k)).collect();
        names.push(quote_ident(TIMESTAMP_COLUMN));
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(HISTORICAL_TABLE),
            names.join(", "),
            placeholders
        );

        let query = observation
            .values
            .values()
            .fold(sqlx::query(&sql), bind_feature)
            .bind(to_storage_string(&observation.timestamp));
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Persist one metrics snapshot
    pub async fn insert_snapshot(&self, snapshot: &MetricsSnapshot) -> Result<(), MonitoringError> {
        let sql = format!(
            "INSERT INTO {} (drift_detected, column_drift_metric, number_of_drifted_columns, \
             current_share_of_missing_values, reference_share_of_missing_values, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?)",
            quote_ident(METRICS_TABLE)
        );
        sqlx::query(&sql)
            .bind(snapshot.drift_detected)
            .bind(snapshot.column_drift_metric)
            .bind(snapshot.number_of_drifted_columns)
            .bind(snapshot.current_share_of_missing_values)
            .bind(snapshot.reference_share_of_missing_values)
            .bind(to_storage_string(&snapshot.timestamp))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self, table: &str) -> Result<i64, MonitoringError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn ensure_columns<'a>(
        &self,
        names: impl Iterator<Item = &'a String>,
    ) -> Result<(), MonitoringError> {
        let mut known = self.historical_columns.lock().await;
        let missing: Vec<String> = names.filter(|n| !known.contains(*n)).cloned().collect();
        if missing.is_empty() {
            return Ok(());
        }

        debug!(columns = ?missing, "Observation carries new columns");
        let mut candidate = known.clone();
        candidate.extend(missing);
        // Cache only what the table actually has
        SchemaSync::ensure_table(&self.pool, &historical_table(&candidate)).await?;
        *known = candidate;
        Ok(())
    }
}

fn historical_table(columns: &BTreeSet<String>) -> TableDefinition {
    let table = columns.iter().fold(TableDefinition::new(HISTORICAL_TABLE), |t, name| {
        let sql_type = if name == PREDICTION_COLUMN { "TEXT" } else { "NUMERIC" };
        t.column(ColumnDefinition::new(name.clone(), sql_type))
    });
    table.column(ColumnDefinition::new(TIMESTAMP_COLUMN, "TEXT").not_null())
}

fn metrics_table() -> TableDefinition {
    TableDefinition::new(METRICS_TABLE)
        .column(ColumnDefinition::new("drift_detected", "INTEGER").not_null())
        .column(ColumnDefinition::new("column_drift_metric", "REAL").not_null())
        .column(ColumnDefinition::new("number_of_drifted_columns", "INTEGER").not_null())
        .column(ColumnDefinition::new("current_share_of_missing_values", "REAL").not_null())
        .column(ColumnDefinition::new("reference_share_of_missing_values", "REAL").not_null())
        .column(ColumnDefinition::new(TIMESTAMP_COLUMN, "TEXT").not_null())
}

fn bind_feature<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &FeatureValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        FeatureValue::Number(n) => query.bind(*n),
        FeatureValue::Bool(b) => query.bind(*b),
        FeatureValue::Text(s) => query.bind(s.clone()),
        FeatureValue::Null => query.bind(None::<String>),
    }
}
