//! File-backed storage adapter — the durable local map.
//!
//! Layout: one JSON document per workflow inside the storage directory, plus
//! an `index.json` mapping workflow ids to file names.  The index is a pure
//! cache: if it goes missing or is corrupted it is rebuilt by scanning the
//! directory and reading the `id` field out of each document.
//!
//! Saves are atomic per id (write to a temp file, then rename).  An optional
//! byte quota turns oversized saves into [`StorageError::QuotaExceeded`]
//! without touching the store.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{StorageAdapter, StorageError};

const INDEX_FILE: &str = "index.json";

pub struct FileStorage {
    dir: PathBuf,
    max_bytes: Option<u64>,
    /// id → file name.  Loaded lazily; `None` until first use.
    index: Mutex<Option<HashMap<String, String>>>,
}

impl FileStorage {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_bytes: None,
            index: Mutex::new(None),
        })
    }

    /// Cap the total bytes of persisted documents.  A save that would exceed
    /// the cap fails with [`StorageError::QuotaExceeded`].
    pub fn with_quota(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Derive a filesystem-safe file name for a workflow id.  The hash suffix
    /// keeps distinct ids distinct even after character replacement.
    fn file_name_for(id: &str) -> String {
        let mut safe: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        safe.truncate(64);

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        format!("{safe}-{:016x}.json", hasher.finish())
    }

    /// Load the index, rebuilding it from the directory contents when it is
    /// missing or unreadable.
    async fn load_index(&self) -> Result<HashMap<String, String>, StorageError> {
        match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(index) => Ok(index),
                Err(err) => {
                    warn!("index file corrupted ({err}); rebuilding from directory scan");
                    self.rebuild_index().await
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => self.rebuild_index().await,
            Err(err) => Err(err.into()),
        }
    }

    async fn rebuild_index(&self) -> Result<HashMap<String, String>, StorageError> {
        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == INDEX_FILE || !name.ends_with(".json") {
                continue;
            }
            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(doc) => {
                    if let Some(id) = doc.get("id").and_then(Value::as_str) {
                        index.insert(id.to_owned(), name);
                    }
                }
                Err(err) => warn!("skipping unreadable document {name}: {err}"),
            }
        }

        self.write_index(&index).await?;
        Ok(index)
    }

    async fn write_index(&self, index: &HashMap<String, String>) -> Result<(), StorageError> {
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, serde_json::to_vec(index)?).await?;
        tokio::fs::rename(&tmp, self.index_path()).await?;
        Ok(())
    }

    /// Total persisted bytes if `id` were to hold a document of `new_len`
    /// bytes.
    async fn projected_usage(
        &self,
        index: &HashMap<String, String>,
        id: &str,
        new_len: u64,
    ) -> u64 {
        let mut total = new_len;
        for (other_id, file_name) in index {
            if other_id == id {
                continue;
            }
            if let Ok(meta) = tokio::fs::metadata(self.dir.join(file_name)).await {
                total += meta.len();
            }
        }
        total
    }

    async fn write_document(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn save(&self, id: &str, state: &Value) -> Result<(), StorageError> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        let index = guard.as_mut().unwrap();

        let bytes = serde_json::to_vec(state)?;

        if let Some(limit) = self.max_bytes {
            let needed = self.projected_usage(index, id, bytes.len() as u64).await;
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }

        let file_name = Self::file_name_for(id);
        self.write_document(&self.dir.join(&file_name), &bytes)
            .await?;

        index.insert(id.to_owned(), file_name);
        let snapshot = index.clone();
        self.write_index(&snapshot).await
    }

    async fn load(&self, id: &str) -> Result<Option<Value>, StorageError> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        let index = guard.as_mut().unwrap();

        let Some(file_name) = index.get(id).cloned() else {
            return Ok(None);
        };

        match tokio::fs::read(self.dir.join(&file_name)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Stale index entry; drop it.
                index.remove(id);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        let index = guard.as_mut().unwrap();

        if let Some(file_name) = index.remove(id) {
            match tokio::fs::remove_file(self.dir.join(file_name)).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            let snapshot = index.clone();
            self.write_index(&snapshot).await?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        Ok(guard.as_ref().unwrap().keys().cloned().collect())
    }
}
