//! Automatic Schema Synchronization
//!
//! Monitoring tables are partly data-driven: `historical_data` carries one
//! column per model feature, so its shape is only known once the model is
//! loaded. Tables are therefore described as values ([`TableDefinition`])
//! rather than compile-time schemas.
//!
//! Two-phase initialization:
//! 1. **CREATE TABLE IF NOT EXISTS** - Create missing tables
//! 2. **Auto-Sync** - Add missing columns via ALTER TABLE
//!
//! # Usage
//!
//! ```rust,ignore
//! let table = TableDefinition::new("evidently_metrics")
//!     .column(ColumnDefinition::new("drift_detected", "INTEGER").not_null())
//!     .column(ColumnDefinition::new("timestamp", "TEXT").not_null());
//!
//! SchemaSync::ensure_table(&pool, &table).await?;
//! ```

use crate::Result;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name (quoted when rendered, so any feature name is allowed)
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL"); empty for no declared type
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
}

impl ColumnDefinition {
    /// Create new column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
        }
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    fn render(&self) -> String {
        let mut sql = quote_ident(&self.name);
        if !self.sql_type.is_empty() {
            sql.push(' ');
            sql.push_str(&self.sql_type);
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        sql
    }

    /// Rendering for ALTER TABLE ADD COLUMN
    ///
    /// SQLite rejects NOT NULL without a default on added columns, so the
    /// constraint is dropped.
    fn render_for_add(&self) -> String {
        Self {
            not_null: false,
            ..self.clone()
        }
        .render()
    }
}

/// Declarative table definition
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    fn create_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(ColumnDefinition::render).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            columns.join(", ")
        )
    }
}

/// Quote an SQL identifier (feature names contain spaces and parentheses)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub name: String,
    pub type_name: String,
}

/// Schema synchronization - create tables and add missing columns
pub struct SchemaSync;

impl SchemaSync {
    /// Create the table if needed, then add any columns it lacks
    ///
    /// Returns the names of columns added by ALTER TABLE.
    ///
    /// **What this CANNOT fix (requires manual migration):**
    /// - Type changes (logged as a warning)
    /// - Column removal (SQLite limitation)
    pub async fn ensure_table(pool: &SqlitePool, table: &TableDefinition) -> Result<Vec<String>> {
        sqlx::query(&table.create_sql()).execute(pool).await?;

        let actual = Self::introspect_table(pool, &table.name).await?;
        let mut added = Vec::new();

        for expected in &table.columns {
            match actual.iter().find(|c| c.name == expected.name) {
                Some(existing) => {
                    if !types_compatible(&expected.sql_type, &existing.type_name) {
                        warn!(
                            table = %table.name,
                            column = %expected.name,
                            expected = %expected.sql_type,
                            actual = %existing.type_name,
                            "Schema sync: column type mismatch (manual migration required)"
                        );
                    }
                }
                None => {
                    let sql = format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        quote_ident(&table.name),
                        expected.render_for_add()
                    );
                    sqlx::query(&sql).execute(pool).await?;
                    info!(
                        "Schema sync: added column '{}' to table '{}'",
                        expected.name, table.name
                    );
                    added.push(expected.name.clone());
                }
            }
        }

        debug!(
            "Schema sync: table '{}' has {} expected columns",
            table.name,
            table.columns.len()
        );
        Ok(added)
    }

    /// Read actual columns from database table using PRAGMA table_info
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let query = format!("PRAGMA table_info({})", quote_ident(table_name));
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<(i64, ActualColumn)> = rows
            .iter()
            .map(|row| {
                (
                    row.get::<i64, _>("cid"),
                    ActualColumn {
                        name: row.get("name"),
                        type_name: row.get("type"),
                    },
                )
            })
            .collect();

        columns.sort_by_key(|(cid, _)| *cid);
        Ok(columns.into_iter().map(|(_, c)| c).collect())
    }
}

/// Check if SQL types are compatible (SQLite type affinity rules)
fn types_compatible(expected: &str, actual: &str) -> bool {
    let exp = expected.to_uppercase();
    let act = actual.to_uppercase();

    if exp == act || exp.is_empty() {
        return true;
    }

    let affinity = |t: &str| {
        if t.contains("INT") {
            "INTEGER"
        } else if t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB") {
            "TEXT"
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            "REAL"
        } else {
            "NUMERIC"
        }
    };

    affinity(&exp) == affinity(&act)
}
