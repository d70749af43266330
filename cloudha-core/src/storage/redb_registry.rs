//! Registry backed by a redb database file
//!
//! Each namespace is its own table. Values are JSON bytes so records keep
//! their free-form metadata.

use super::Registry;
use crate::error::{FailoverError, FailoverResult};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

pub struct RedbRegistry {
    database: Arc<Database>,
}

fn table(namespace: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(namespace)
}

impl RedbRegistry {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> FailoverResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let database = Database::create(path.as_ref())?;
        Ok(Self {
            database: Arc::new(database),
        })
    }

    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Registry for RedbRegistry {
    async fn list(&self, namespace: &str) -> FailoverResult<Vec<(String, Value)>> {
        let db = self.database.clone();
        let namespace = namespace.to_string();

        tokio::task::spawn_blocking(move || -> FailoverResult<Vec<(String, Value)>> {
            let read_txn = db.begin_read()?;
            let table = match read_txn.open_table(table(&namespace)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(FailoverError::from(e)),
            };

            let mut records = Vec::new();
            for entry in table.iter()? {
                let (key, bytes) = entry?;
                let value: Value = serde_json::from_slice(bytes.value())?;
                records.push((key.value().to_string(), value));
            }
            trace!(namespace = %namespace, count = records.len(), "listed registry records");
            Ok(records)
        })
        .await?
    }

    async fn get(&self, namespace: &str, key: &str) -> FailoverResult<Option<Value>> {
        let db = self.database.clone();
        let namespace = namespace.to_string();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> FailoverResult<Option<Value>> {
            let read_txn = db.begin_read()?;
            let table = match read_txn.open_table(table(&namespace)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(FailoverError::from(e)),
            };

            let record = table.get(key.as_str())?;
            let value = match record {
                Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
                None => None,
            };
            Ok(value)
        })
        .await?
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> FailoverResult<()> {
        let db = self.database.clone();
        let namespace = namespace.to_string();
        let key = key.to_string();
        let bytes = serde_json::to_vec(value)?;

        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(table(&namespace))?;
                table.insert(key.as_str(), bytes.as_slice())?;
            }
            write_txn.commit()?;
            Ok::<(), FailoverError>(())
        })
        .await?
    }

    async fn delete(&self, namespace: &str, key: &str) -> FailoverResult<()> {
        self.delete_many(namespace, &[key.to_string()]).await
    }

    async fn delete_many(&self, namespace: &str, keys: &[String]) -> FailoverResult<()> {
        let db = self.database.clone();
        let namespace = namespace.to_string();
        let keys = keys.to_vec();

        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(table(&namespace))?;
                for key in &keys {
                    table.remove(key.as_str())?;
                }
            }
            write_txn.commit()?;
            Ok::<(), FailoverError>(())
        })
        .await?
    }
}
