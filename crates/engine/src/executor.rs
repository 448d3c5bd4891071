//! Executor facade: start/resume/query/delete over workflows, event
//! emission, and ownership of the running set.
//!
//! The executor exclusively owns a workflow's in-memory state for the
//! duration of one start/resume call; between calls the storage adapter owns
//! the durable copy.  A process-local running set rejects concurrent
//! start/resume of the same id.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::dag::validate_definition;
use crate::events::EventBus;
use crate::failure::FailureEngine;
use crate::models::{
    EventRecord, ExecutionResult, FailureHandlingConfig, NodeStatus, RetryConfig,
    WorkflowDefinition, WorkflowState,
};
use crate::subflow::SubflowRegistry;
use crate::EngineError;
use nodes::{Context, HandlerRegistry};
use storage::StorageAdapter;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Cap on concurrently dispatched nodes within one round.  `None` means
    /// a whole ready set dispatches at once.
    pub max_parallel: Option<usize>,
    /// Retry schedule for nodes that configure none of their own.
    pub default_retry: RetryConfig,
    /// Failure handling when neither the node nor the workflow overrides it.
    pub default_failure_handling: FailureHandlingConfig,
    /// Subflow nesting bound when the node doesn't set one.
    pub default_subflow_max_depth: usize,
    /// Events retained by the bus.
    pub event_history_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            default_retry: RetryConfig::default(),
            default_failure_handling: FailureHandlingConfig::fail_fast(),
            default_subflow_max_depth: 10,
            event_history_limit: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

pub(crate) struct Inner {
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) events: EventBus,
    pub(crate) failure: FailureEngine,
    pub(crate) subflows: SubflowRegistry,
    pub(crate) running: DashSet<String>,
    pub(crate) cancellations: DashMap<String, broadcast::Sender<()>>,
    pub(crate) config: ExecutorConfig,
}

/// The engine's front door.  Cheap to clone; all clones share one running
/// set, handler registry, event bus, and failure engine.
#[derive(Clone)]
pub struct WorkflowExecutor {
    pub(crate) inner: Arc<Inner>,
}

impl WorkflowExecutor {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self::with_config(storage, ExecutorConfig::default())
    }

    pub fn with_config(storage: Arc<dyn StorageAdapter>, config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                registry: HandlerRegistry::new(),
                events: EventBus::new(config.event_history_limit),
                failure: FailureEngine::new(),
                subflows: SubflowRegistry::new(),
                running: DashSet::new(),
                cancellations: DashMap::new(),
                config,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Collaborator access
    // -----------------------------------------------------------------------

    /// The process-wide handler registry, for plugin registration.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn failure(&self) -> &FailureEngine {
        &self.inner.failure
    }

    /// Register a child workflow definition addressable via `subflow_id`.
    pub fn register_subflow(&self, definition: WorkflowDefinition) {
        self.inner.subflows.register(definition);
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Validate and run a workflow from scratch.  Returns once the graph is
    /// terminal or every remaining node is blocked on events (WAITING).
    ///
    /// # Errors
    /// Validation failures reject before any state is persisted; storage
    /// failures abort the round they occur in.
    #[instrument(skip(self, definition, initial_context), fields(workflow_id = %definition.id))]
    pub async fn start_workflow(
        &self,
        definition: WorkflowDefinition,
        initial_context: Option<Context>,
    ) -> Result<ExecutionResult, EngineError> {
        let workflow_id = definition.id.clone();
        self.execute_definition(workflow_id, definition, initial_context.unwrap_or_default())
            .await
    }

    /// Pick up a persisted workflow where it left off — typically after an
    /// event arrival or a process restart.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn resume_workflow(&self, workflow_id: &str) -> Result<ExecutionResult, EngineError> {
        let state = self
            .load_state(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(workflow_id.to_owned()))?;

        if state.status.is_terminal() {
            info!("workflow already terminal ({}); nothing to resume", state.status);
            return Ok(Self::build_result(&state, 0));
        }

        let (guard, cancel_rx) = self.acquire(workflow_id)?;
        let result = self.drive(state, cancel_rx).await;
        drop(guard);
        result
    }

    /// Signal cancellation to an in-flight start/resume call.  Returns
    /// whether a running workflow was found.
    pub fn cancel_workflow(&self, workflow_id: &str) -> bool {
        match self.inner.cancellations.get(workflow_id) {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    /// Load the persisted state for `workflow_id`, or `None` when absent.
    pub async fn get_workflow_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowState>, EngineError> {
        self.load_state(workflow_id).await
    }

    /// Delete the persisted state.  Rejected while the workflow is being
    /// driven by this process; deleting an absent id succeeds.
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<(), EngineError> {
        if self.inner.running.contains(workflow_id) {
            return Err(EngineError::DeleteWhileRunning(workflow_id.to_owned()));
        }
        self.inner.storage.delete(workflow_id).await?;
        Ok(())
    }

    /// Ids of every persisted workflow.
    pub async fn list_workflows(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.inner.storage.list().await?)
    }

    /// Publish a named event.  Waiting workflows observe it on their next
    /// resume.
    pub fn emit_event(
        &self,
        event_type: impl Into<String>,
        data: Option<Value>,
        node_id: Option<String>,
    ) -> EventRecord {
        let record = EventRecord::new(event_type, data, node_id);
        self.inner.events.emit(record.clone());
        record
    }

    // -----------------------------------------------------------------------
    // Internals shared with the scheduler
    // -----------------------------------------------------------------------

    /// Validate, create initial state, persist it, and drive to suspension.
    ///
    /// This is the recursion point for subflows, hence the boxed future:
    /// a subflow node re-enters here with a derived child id.
    pub(crate) fn execute_definition(
        &self,
        workflow_id: String,
        definition: WorkflowDefinition,
        context: Context,
    ) -> BoxFuture<'static, Result<ExecutionResult, EngineError>> {
        let this = self.clone();
        Box::pin(async move {
            validate_definition(&definition)?;
            let (guard, cancel_rx) = this.acquire(&workflow_id)?;

            let state = WorkflowState::new(workflow_id, definition, context);
            this.persist(&state).await?;
            this.emit_lifecycle("workflow.started", &state.id, None, json!({}));
            info!(workflow_id = %state.id, nodes = state.nodes.len(), "workflow started");

            let result = this.drive(state, cancel_rx).await;
            drop(guard);
            result
        })
    }

    fn acquire(&self, workflow_id: &str) -> Result<(RunGuard, broadcast::Receiver<()>), EngineError> {
        if !self.inner.running.insert(workflow_id.to_owned()) {
            return Err(EngineError::AlreadyRunning(workflow_id.to_owned()));
        }
        let (sender, receiver) = broadcast::channel(4);
        self.inner
            .cancellations
            .insert(workflow_id.to_owned(), sender);
        Ok((
            RunGuard {
                inner: self.inner.clone(),
                workflow_id: workflow_id.to_owned(),
            },
            receiver,
        ))
    }

    pub(crate) async fn persist(&self, state: &WorkflowState) -> Result<(), EngineError> {
        let document = serde_json::to_value(state)?;
        self.inner.storage.save(&state.id, &document).await?;
        Ok(())
    }

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, EngineError> {
        match self.inner.storage.load(workflow_id).await? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    /// Emit an engine lifecycle notification into the bus.
    pub(crate) fn emit_lifecycle(
        &self,
        event_type: &str,
        workflow_id: &str,
        node_id: Option<&str>,
        mut data: Value,
    ) {
        if let Some(fields) = data.as_object_mut() {
            fields.insert("workflowId".to_owned(), json!(workflow_id));
        }
        self.inner.events.emit(EventRecord::new(
            event_type,
            Some(data),
            node_id.map(str::to_owned),
        ));
    }

    pub(crate) fn build_result(state: &WorkflowState, duration_ms: u64) -> ExecutionResult {
        ExecutionResult {
            workflow_id: state.id.clone(),
            status: state.status,
            error: state.error.clone(),
            duration_ms,
            node_results: state.node_results(),
            completed_nodes: state.count_with_status(NodeStatus::Completed),
            failure_count: state.count_with_status(NodeStatus::Failed)
                + state.count_with_status(NodeStatus::DeadLettered),
            failure_metrics: state.failure_metrics.clone(),
        }
    }
}

/// Removes the workflow from the running set (and drops its cancellation
/// channel) when a start/resume call ends, however it ends.
struct RunGuard {
    inner: Arc<Inner>,
    workflow_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.running.remove(&self.workflow_id);
        self.inner.cancellations.remove(&self.workflow_id);
    }
}
