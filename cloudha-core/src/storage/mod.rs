//! Durable key-value registry
//!
//! Records are grouped by namespace and stored as JSON blobs. The failover
//! engine keeps one record per instance and one singleton run record.

use crate::error::FailoverResult;
use async_trait::async_trait;
use serde_json::Value;

pub mod redb_registry;

pub use redb_registry::RedbRegistry;

#[async_trait]
pub trait Registry: Send + Sync {
    /// All records in a namespace, ordered by key
    async fn list(&self, namespace: &str) -> FailoverResult<Vec<(String, Value)>>;

    async fn get(&self, namespace: &str, key: &str) -> FailoverResult<Option<Value>>;

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> FailoverResult<()>;

    /// Removing a missing key is not an error
    async fn delete(&self, namespace: &str, key: &str) -> FailoverResult<()>;

    async fn delete_many(&self, namespace: &str, keys: &[String]) -> FailoverResult<()> {
        for key in keys {
            self.delete(namespace, key).await?;
        }
        Ok(())
    }
}
