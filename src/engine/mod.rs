//! Relational Engine Module
//!
//! The coordinator and every node own one local relational engine. The cluster code
//! only needs four things from it: run a query, bulk-load a delimited file, insert
//! rows pushed over the network, and empty a table.
//!
//! ## Submodules
//! - **`sqlite`**: `SqliteEngine`, the `RelationalEngine` used by both binaries.
//! - **`extract`**: `SqlTableExtractor`, which lists the base tables a query reads and
//!   whether each one appears only inside a subquery.

pub mod extract;
pub mod sqlite;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// A result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub trait RelationalEngine: Send + Sync {
    /// Executes one SQL statement and returns its rows (empty for non-queries).
    fn execute(&self, sql: &str) -> Result<Vec<Row>>;

    /// Appends every row of a delimited file to `table`. Returns rows loaded.
    fn bulk_load(&self, table: &str, path: &Path, delimiter: u8) -> Result<usize>;

    /// Inserts JSON rows into `table`, matching object keys to column names.
    fn insert(&self, table: &str, rows: &[Row]) -> Result<usize>;

    /// Deletes every row of `table`.
    fn truncate(&self, table: &str) -> Result<()>;

    /// Runs a batch of DDL statements.
    fn apply_schema(&self, ddl: &str) -> Result<()>;
}

pub type SharedEngine = Arc<dyn RelationalEngine>;

/// Runs a blocking engine call off the async runtime.
pub async fn run_blocking<T, F>(engine: &SharedEngine, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn RelationalEngine) -> Result<T> + Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(engine.as_ref())).await?
}
