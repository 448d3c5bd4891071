//! The `StorageAdapter` trait — the contract every persistence backend must
//! fulfil.
//!
//! Documents are opaque `serde_json::Value`s so the crate stays free of
//! engine types; the engine serialises its workflow state before handing it
//! over and re-materialises timestamps on load.

use async_trait::async_trait;
use serde_json::Value;

use crate::StorageError;

/// Durable CRUD over workflow state keyed by workflow id.
///
/// Implementations must make each `save` atomic with respect to concurrent
/// readers of the same id: a reader sees either the previous document or the
/// new one, never a torn write.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Atomically replace the document stored under `id`.
    ///
    /// On error the caller must treat its in-memory state as non-durable.
    async fn save(&self, id: &str, state: &Value) -> Result<(), StorageError>;

    /// Load the document stored under `id`, or `None` when absent.
    async fn load(&self, id: &str) -> Result<Option<Value>, StorageError>;

    /// Delete the document stored under `id`.  Idempotent — deleting an
    /// absent id succeeds.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// All ids currently persisted.
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}
