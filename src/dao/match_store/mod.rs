mod memory;

pub use memory::MemoryMatchStore;

use futures::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for match documents.
///
/// Documents are opaque JSON so unreadable ones survive a round trip untouched.
pub trait MatchStore: Send + Sync {
    fn save_match(&self, id: Uuid, document: Value) -> BoxFuture<'static, StorageResult<()>>;
    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    fn list_matches(&self) -> BoxFuture<'static, StorageResult<Vec<Value>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
