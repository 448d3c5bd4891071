//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine (validation + execution).
///
/// Node-level failures (handler errors, timeouts, open breakers, subflow
/// violations) are not surfaced here — they are captured in the node's
/// state and classified by the failure policy.  What reaches the caller of
/// start/resume is validation problems, lifecycle misuse, and persistence
/// failures.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A node lists a dependency that doesn't exist in the workflow.
    #[error("node '{node_id}' depends on unknown node '{dependency}'")]
    UnknownDependency { node_id: String, dependency: String },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// A subflow node names no target workflow at all.
    #[error("subflow node '{0}' has neither an inline definition nor a subflow id")]
    MissingSubflowTarget(String),

    // ------ Lifecycle errors ------

    /// Start/resume was called for an id that is already being driven by
    /// this process.
    #[error("workflow '{0}' already running")]
    AlreadyRunning(String),

    /// Resume was called for an id with no persisted state.
    #[error("workflow '{0}' not found")]
    NotFound(String),

    /// Delete was called while the workflow is being driven.
    #[error("workflow '{0}' is running and cannot be deleted")]
    DeleteWhileRunning(String),

    // ------ Persistence errors ------

    /// Adapter failure.  Aborts the current scheduler round; the durable
    /// copy keeps whatever state the last successful save wrote.
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Workflow state could not be encoded to / decoded from JSON.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
