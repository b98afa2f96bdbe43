// Public API
pub mod error;
pub mod partition;
pub mod scanner;
pub mod schema;
pub mod session;
pub mod table;

// Internal modules
pub(crate) mod constants;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::constants::DEFAULT_OPERATION_TIMEOUT_MS;

pub use error::{Error, Result};
pub use partition::{PartitionConfig, PartitionId, Partitioner};
pub use scanner::{ComparisonOp, Predicate, ReadMode, RowResult, Scanner, ScannerBuilder};
pub use schema::{ColumnSchema, ColumnType, PartialRow, Row, Schema, SchemaBuilder, Value};
pub use session::{FlushMode, MutationIntent, OperationKind, OperationResponse, Session, SessionConfig};
pub use table::{SeqNum, Table, TableStats};

/// Configuration for a database handle.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Deadline for table operations when the caller gives none. None waits
    /// indefinitely.
    pub default_operation_timeout: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout: Some(Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS)),
        }
    }
}

/// An in-process database: a registry of named tables.
pub struct Database {
    config: DatabaseConfig,
    tables: DashMap<String, Arc<Table>>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            tables: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn create_table(
        &self,
        name: &str,
        schema: Schema,
        partition_config: &PartitionConfig,
    ) -> Result<Arc<Table>> {
        match self.tables.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::TableAlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                let table = Arc::new(Table::new(
                    name,
                    schema,
                    partition_config,
                    self.config.default_operation_timeout,
                )?);
                info!(
                    table = name,
                    tablets = table.tablets().len(),
                    columns = table.schema().column_count(),
                    "created table"
                );
                slot.insert(Arc::clone(&table));
                Ok(table)
            }
        }
    }

    pub fn open_table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .get(name)
            .map(|table| Arc::clone(table.value()))
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Remove a table from the registry. Handles already held stay usable.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        match self.tables.remove(name) {
            Some(_) => {
                info!(table = name, "dropped table");
                Ok(())
            }
            None => Err(Error::TableNotFound(name.to_string())),
        }
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub fn new_session(&self, config: SessionConfig) -> Result<Session> {
        Session::new(config)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DatabaseConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::builder()
            .add_key_column("id", ColumnType::Int64)
            .add_column("body", ColumnType::Binary)
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_registry() {
        let db = Database::default();
        let created = db.create_table("b", schema(), &PartitionConfig::default()).unwrap();
        db.create_table("a", schema(), &PartitionConfig::default()).unwrap();

        assert!(matches!(
            db.create_table("b", schema(), &PartitionConfig::default()),
            Err(Error::TableAlreadyExists(_))
        ));
        assert_eq!(db.table_names(), vec!["a", "b"]);
        assert!(Arc::ptr_eq(&created, &db.open_table("b").unwrap()));
        assert_eq!(created.default_timeout(), Some(Duration::from_secs(30)));

        db.drop_table("b").unwrap();
        assert!(matches!(db.open_table("b"), Err(Error::TableNotFound(_))));
        assert!(matches!(db.drop_table("b"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn test_invalid_partitioning_is_not_registered() {
        let db = Database::default();
        let partitions = PartitionConfig {
            num_hash_buckets: 0,
            ..Default::default()
        };
        assert!(matches!(
            db.create_table("t", schema(), &partitions),
            Err(Error::Config(_))
        ));
        assert!(db.table_names().is_empty());
    }

    #[test]
    fn test_databases_are_independent() {
        let first = Database::default();
        let second = Database::default();
        first.create_table("t", schema(), &PartitionConfig::default()).unwrap();
        assert!(second.open_table("t").is_err());
        assert!(second.create_table("t", schema(), &PartitionConfig::default()).is_ok());
    }
}
