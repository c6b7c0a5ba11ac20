use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::{
    match_store::MatchStore,
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("in-memory store is offline")]
struct Offline;

/// Process-local match store.
///
/// It can be switched offline to exercise the degraded paths of its callers.
#[derive(Clone, Default)]
pub struct MemoryMatchStore {
    documents: Arc<DashMap<Uuid, Value>>,
    offline: Arc<AtomicBool>,
}

impl MemoryMatchStore {
    /// Empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (`true`) or succeed again (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn check_online(offline: &AtomicBool, operation: &str) -> StorageResult<()> {
        if offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                format!("{operation} failed"),
                Offline,
            ))
        } else {
            Ok(())
        }
    }
}

impl MatchStore for MemoryMatchStore {
    fn save_match(&self, id: Uuid, document: Value) -> BoxFuture<'static, StorageResult<()>> {
        let documents = self.documents.clone();
        let offline = self.offline.clone();
        Box::pin(async move {
            Self::check_online(&offline, "save_match")?;
            documents.insert(id, document);
            Ok(())
        })
    }

    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let documents = self.documents.clone();
        let offline = self.offline.clone();
        Box::pin(async move {
            Self::check_online(&offline, "find_match")?;
            Ok(documents.get(&id).map(|entry| entry.value().clone()))
        })
    }

    fn list_matches(&self) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let documents = self.documents.clone();
        let offline = self.offline.clone();
        Box::pin(async move {
            Self::check_online(&offline, "list_matches")?;
            Ok(documents
                .iter()
                .map(|entry| entry.value().clone())
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let offline = self.offline.clone();
        Box::pin(async move { Self::check_online(&offline, "health_check") })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn documents_round_trip() {
        let store = MemoryMatchStore::new();
        let id = Uuid::new_v4();
        store.save_match(id, json!({ "x": 1 })).await.unwrap();
        assert_eq!(store.find_match(id).await.unwrap(), Some(json!({ "x": 1 })));
        assert_eq!(store.list_matches().await.unwrap().len(), 1);
        assert!(store.find_match(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryMatchStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.health_check().await,
            Err(StorageError::Unavailable { .. })
        ));
        assert!(store.save_match(Uuid::new_v4(), json!({})).await.is_err());
        store.set_offline(false);
        assert!(store.health_check().await.is_ok());
    }
}
