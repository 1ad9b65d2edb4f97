//! # Catalog Interface
//!
//! The catalog provides the optimizer with metadata about the database schema:
//! table column definitions, table-level statistics and declared unique keys.
//! Statistics feed the default stats calculator; unique keys feed the logical
//! properties of table scans.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is intentionally minimal and behind a trait object (`dyn Catalog`)
//! so that different backends can provide metadata. Independent optimization passes may
//! read the same catalog concurrently, hence the `Send + Sync` bound. For testing and
//! the command line tool, `InMemoryCatalog` provides a simple map-based implementation
//! that can be populated programmatically or loaded from JSON.
//!
//! ## Key Lookups
//!
//! Tables are identified by `TableRef` (schema + name). The catalog returns:
//! - `get_table_stats`: Row count, total size, and per-column statistics keyed by
//!   column name. Returns `None` if the table is unknown.
//! - `get_table_columns`: Column definitions. Returns `None` if the table is unknown.
//! - `get_table_keys`: Sets of columns whose combined values are unique.

use crate::expr::{DataType, TableRef};
use crate::stats::StatsEstimate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Catalog provides schema and statistics information.
pub trait Catalog: Send + Sync {
    fn get_table_stats(&self, table: &TableRef) -> Option<StatsEstimate>;
    fn get_table_columns(&self, table: &TableRef) -> Option<Vec<ColumnMetadata>>;

    fn get_table_keys(&self, _table: &TableRef) -> Vec<Vec<String>> {
        Vec::new()
    }
}

/// In-memory catalog for testing and development.
///
/// Tables are keyed by their fully-qualified name (`schema.table`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryCatalog {
    /// Table-level statistics keyed by "schema.table".
    pub table_stats: HashMap<String, StatsEstimate>,
    /// Column definitions keyed by "schema.table".
    pub table_columns: HashMap<String, Vec<ColumnMetadata>>,
    /// Unique keys keyed by "schema.table".
    pub table_keys: HashMap<String, Vec<Vec<String>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(table: &TableRef) -> String {
        format!("{}.{}", table.schema, table.name)
    }

    pub fn add_table(&mut self, table: &TableRef, columns: Vec<ColumnMetadata>, stats: StatsEstimate) {
        let key = Self::key(table);
        self.table_columns.insert(key.clone(), columns);
        self.table_stats.insert(key, stats);
    }

    pub fn add_unique_key(&mut self, table: &TableRef, columns: &[&str]) {
        self.table_keys
            .entry(Self::key(table))
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table_stats(&self, table: &TableRef) -> Option<StatsEstimate> {
        self.table_stats.get(&Self::key(table)).cloned()
    }

    fn get_table_columns(&self, table: &TableRef) -> Option<Vec<ColumnMetadata>> {
        self.table_columns.get(&Self::key(table)).cloned()
    }

    fn get_table_keys(&self, table: &TableRef) -> Vec<Vec<String>> {
        self.table_keys.get(&Self::key(table)).cloned().unwrap_or_default()
    }
}
