//! In-memory storage adapter for development and testing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{StorageAdapter, StorageError};

/// A mutexed map of workflow id to JSON document.
///
/// Save and load both hand out deep copies, so a caller can never alias the
/// stored document and mutate it behind the adapter's back.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn save(&self, id: &str, state: &Value) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap()
            .insert(id.to_owned(), state.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.entries.lock().unwrap().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().unwrap().keys().cloned().collect())
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_load_round_trip() {
        let store = MemoryStorage::new();
        let doc = json!({ "id": "wf-1", "status": "RUNNING" });

        store.save("wf-1", &doc).await.unwrap();
        let loaded = store.load("wf-1").await.unwrap();
        assert_eq!(loaded, Some(doc));
    }

    #[tokio::test]
    async fn load_absent_id_returns_none() {
        let store = MemoryStorage::new();
        assert_eq!(store.load("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn loaded_copy_is_isolated_from_store() {
        let store = MemoryStorage::new();
        store.save("wf-1", &json!({ "n": 1 })).await.unwrap();

        let mut copy = store.load("wf-1").await.unwrap().unwrap();
        copy["n"] = json!(999);

        // The stored document is unaffected by mutation of the copy.
        assert_eq!(store.load("wf-1").await.unwrap().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn save_overwrites_previous_document() {
        let store = MemoryStorage::new();
        store.save("wf-1", &json!({ "v": 1 })).await.unwrap();
        store.save("wf-1", &json!({ "v": 2 })).await.unwrap();
        assert_eq!(store.load("wf-1").await.unwrap().unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStorage::new();
        store.save("wf-1", &json!({})).await.unwrap();
        store.delete("wf-1").await.unwrap();
        store.delete("wf-1").await.unwrap(); // second delete succeeds too
        assert_eq!(store.load("wf-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_all_ids() {
        let store = MemoryStorage::new();
        store.save("a", &json!({})).await.unwrap();
        store.save("b", &json!({})).await.unwrap();

        let mut ids = store.list().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
