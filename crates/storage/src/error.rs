//! Typed error type for the storage crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing the document would push the store past its configured byte
    /// budget.  The save did not happen.
    #[error("storage quota exceeded: {needed} bytes needed, {limit} byte limit")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote returned a non-2xx status that is not one of the tolerated
    /// 404 cases.
    #[error("remote storage returned {status}: {message}")]
    Http { status: u16, message: String },

    /// The remote list endpoint answered with a body shape we don't know.
    #[error("unrecognised list response shape")]
    MalformedListResponse,
}
