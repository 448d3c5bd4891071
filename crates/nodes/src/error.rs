//! Node-level error type.

use thiserror::Error;

/// Errors returned by a handler's `execute` method.
///
/// Whether a failure is retried is not encoded here — the engine's failure
/// policy decides that from the configured strategy and the error's message
/// (retryable / non-retryable matchers).
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The node's static `inputs` were missing a key or carried the wrong
    /// shape.
    #[error("invalid node input: {0}")]
    InvalidInput(String),
}
