//! `storage` crate — pure persistence layer.
//!
//! Provides the [`StorageAdapter`] contract the engine persists workflow
//! state through, plus three bundled implementations.  No business logic
//! lives here: adapters move opaque JSON documents keyed by workflow id.

pub mod adapter;
pub mod error;
pub mod file;
pub mod http;
pub mod memory;

pub use adapter::StorageAdapter;
pub use error::StorageError;
pub use file::FileStorage;
pub use http::{HttpStorage, HttpStorageConfig};
pub use memory::MemoryStorage;
