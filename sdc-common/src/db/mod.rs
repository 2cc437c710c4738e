//! Metrics store database layer
//!
//! SQLite pool initialization and declarative table definitions that
//! synchronize themselves on startup.

pub mod init;
pub mod schema_sync;

pub use init::init_database;
pub use schema_sync::{quote_ident, ColumnDefinition, SchemaSync, TableDefinition};
