//! `engine` crate — core domain models, DAG validation, and the stateful
//! workflow execution engine.
//!
//! A workflow is a directed acyclic graph of typed nodes with explicit
//! dependencies.  The [`executor::WorkflowExecutor`] drives nodes from
//! pending to terminal states, persists progress after every scheduler round
//! so execution can suspend and resume across process restarts, and
//! coordinates suspension on external events.

pub mod breaker;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod failure;
pub mod models;
mod scheduler;
pub mod subflow;

pub use dag::validate_definition;
pub use error::EngineError;
pub use events::EventBus;
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use failure::{Alert, DeadLetterEntry, FailureDecision, FailureEngine, NodeFailureMetrics};
pub use models::{
    CircuitBreakerConfig, DeadLetterConfig, EventRecord, ExecutionResult, FailureHandlingConfig,
    FailureStrategy, GracefulDegradationConfig, MonitoringConfig, NodeDefinition, NodeState,
    NodeStatus, RetryConfig, WorkflowDefinition, WorkflowState, WorkflowStatus,
};
pub use subflow::{SubflowExecutionContext, SubflowRegistry};
