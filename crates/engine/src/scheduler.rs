//! The DAG scheduler: readiness evaluation, parallel dispatch, state
//! transitions, persistence, and resume.
//!
//! One *round* selects every ready node, dispatches them concurrently,
//! awaits them all, merges outcomes, and persists.  Rounds repeat until the
//! graph is terminal or every remaining node is blocked on events, at which
//! point the workflow suspends to WAITING and the call returns.
//!
//! Ordering guarantees: persistence happens after every round before the
//! next readiness evaluation; a node observes its dependencies in their
//! COMPLETED form; events stamped before a waiting node's `started_at` never
//! satisfy its wait.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::executor::WorkflowExecutor;
use crate::failure::{DeadLetterEntry, FailureDecision};
use crate::models::{
    ExecutionResult, FailureHandlingConfig, FailureStrategy, NodeDefinition, NodeStatus,
    RetryConfig, WorkflowDefinition, WorkflowState, WorkflowStatus,
};
use crate::subflow;
use crate::EngineError;
use nodes::{Context, NodeCall, DEPENDENCY_RESULTS_KEY};

/// What the next round should do.
enum RoundPlan {
    /// Dispatch these nodes concurrently.
    Dispatch(Vec<String>),
    /// Nothing is ready yet, but a retry becomes eligible at this time.
    Sleep(DateTime<Utc>),
    /// No further progress is possible; finish with this status.
    Conclude(WorkflowStatus, Option<String>),
}

/// Terminal-for-this-round outcome of one node dispatch.
struct NodeOutcome {
    node_id: String,
    status: NodeStatus,
    attempts: u32,
    result: Option<Value>,
    error: Option<String>,
    next_attempt_not_before: Option<DateTime<Utc>>,
}

impl WorkflowExecutor {
    // -----------------------------------------------------------------------
    // Round loop
    // -----------------------------------------------------------------------

    pub(crate) async fn drive(
        &self,
        mut state: WorkflowState,
        mut cancel_rx: broadcast::Receiver<()>,
    ) -> Result<ExecutionResult, EngineError> {
        let run_started = Instant::now();
        state.status = WorkflowStatus::Running;

        // A restart may have wiped the in-memory breaker/metrics registry;
        // re-seed it from the persisted snapshot.
        self.inner
            .failure
            .restore(&state.id, state.failure_metrics.as_ref());

        let cancel_tx = self
            .inner
            .cancellations
            .get(&state.id)
            .map(|entry| entry.value().clone());

        loop {
            if cancellation_signalled(&mut cancel_rx) {
                info!(workflow_id = %state.id, "cancelled between rounds; suspending");
                return self
                    .conclude(state, WorkflowStatus::Waiting, None, run_started)
                    .await;
            }

            match self.plan_round(&mut state) {
                RoundPlan::Conclude(status, error) => {
                    return self.conclude(state, status, error, run_started).await;
                }

                RoundPlan::Sleep(until) => {
                    let wait = (until - Utc::now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    debug!(workflow_id = %state.id, "next retry eligible in {wait:?}");
                    tokio::select! {
                        _ = cancel_rx.recv() => {
                            info!(workflow_id = %state.id, "cancelled during retry backoff; suspending");
                            return self
                                .conclude(state, WorkflowStatus::Waiting, None, run_started)
                                .await;
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                }

                RoundPlan::Dispatch(ready) => {
                    let now = Utc::now();
                    for node_id in &ready {
                        if let Some(node_state) = state.nodes.get_mut(node_id) {
                            node_state.status = NodeStatus::Running;
                            if node_state.started_at.is_none() {
                                node_state.started_at = Some(now);
                            }
                            node_state.waiting_for_events = None;
                            node_state.next_attempt_not_before = None;
                        }
                    }
                    debug!(workflow_id = %state.id, "dispatching round: {ready:?}");

                    let outcomes = self.dispatch(&state, &ready, cancel_tx.as_ref()).await;
                    for outcome in outcomes {
                        self.apply_outcome(&mut state, outcome);
                    }
                    self.snapshot_failure_metrics(&mut state);

                    if let Some((node_id, reason)) = first_failed(&state) {
                        error!(workflow_id = %state.id, node_id = %node_id, "round failed: {reason}");
                        return self
                            .conclude(state, WorkflowStatus::Failed, Some(reason), run_started)
                            .await;
                    }
                    self.persist(&state).await?;
                }
            }
        }
    }

    async fn conclude(
        &self,
        mut state: WorkflowState,
        status: WorkflowStatus,
        error: Option<String>,
        run_started: Instant,
    ) -> Result<ExecutionResult, EngineError> {
        state.status = status;
        if error.is_some() {
            state.error = error;
        }
        if status.is_terminal() {
            state.completed_at = Some(Utc::now());
        }
        self.snapshot_failure_metrics(&mut state);
        self.persist(&state).await?;

        let duration_ms = run_started.elapsed().as_millis() as u64;
        match status {
            WorkflowStatus::Completed => {
                info!(workflow_id = %state.id, duration_ms, "workflow completed");
                self.emit_lifecycle(
                    "workflow.completed",
                    &state.id,
                    None,
                    json!({ "duration": duration_ms }),
                );
            }
            WorkflowStatus::Failed => {
                warn!(workflow_id = %state.id, error = ?state.error, "workflow failed");
                self.emit_lifecycle(
                    "workflow.failed",
                    &state.id,
                    None,
                    json!({ "error": state.error.clone() }),
                );
            }
            WorkflowStatus::Waiting => {
                info!(workflow_id = %state.id, "workflow waiting for events");
                self.emit_lifecycle("workflow.waiting", &state.id, None, json!({}));
            }
            _ => {}
        }

        Ok(Self::build_result(&state, duration_ms))
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    fn plan_round(&self, state: &mut WorkflowState) -> RoundPlan {
        let now = Utc::now();
        self.propagate_skips(state, now);
        let satisfied_waits = self.evaluate_event_waits(state, now);

        let mut ready: Vec<String> = Vec::new();
        let mut next_backoff: Option<DateTime<Utc>> = None;

        for node_def in &state.definition.nodes {
            let Some(node_state) = state.nodes.get(&node_def.id) else {
                continue;
            };
            match node_state.status {
                NodeStatus::Pending => {
                    if has_event_waits(node_def) {
                        // Enters WAITING via evaluate_event_waits once its
                        // dependencies allow; never dispatched from PENDING.
                        continue;
                    }
                    if !self.dependencies_satisfied(state, node_def) {
                        continue;
                    }
                    if let Some(not_before) = node_state.next_attempt_not_before {
                        if not_before > now {
                            next_backoff =
                                Some(next_backoff.map_or(not_before, |c| c.min(not_before)));
                            continue;
                        }
                    }
                    ready.push(node_def.id.clone());
                }
                NodeStatus::Waiting if satisfied_waits.contains(&node_def.id) => {
                    ready.push(node_def.id.clone());
                }
                _ => {}
            }
        }

        if !ready.is_empty() {
            return RoundPlan::Dispatch(ready);
        }

        if let Some((_, reason)) = first_failed(state) {
            return RoundPlan::Conclude(WorkflowStatus::Failed, Some(reason));
        }
        if state
            .nodes
            .values()
            .any(|n| n.status == NodeStatus::Waiting)
        {
            return RoundPlan::Conclude(WorkflowStatus::Waiting, None);
        }
        if state
            .nodes
            .values()
            .all(|n| n.status == NodeStatus::Completed || n.status.is_skip_class())
        {
            return RoundPlan::Conclude(WorkflowStatus::Completed, None);
        }
        if let Some(until) = next_backoff {
            return RoundPlan::Sleep(until);
        }
        RoundPlan::Conclude(WorkflowStatus::Failed, Some("execution stalled".to_owned()))
    }

    /// Dependents of skip-class nodes become SKIPPED themselves, unless
    /// their policy is graceful degradation configured to continue.
    /// Iterates to a fixpoint so skips cascade through chains.
    fn propagate_skips(&self, state: &mut WorkflowState, now: DateTime<Utc>) {
        loop {
            let mut to_skip: Vec<(String, String)> = Vec::new();
            for node_def in &state.definition.nodes {
                let Some(node_state) = state.nodes.get(&node_def.id) else {
                    continue;
                };
                if node_state.status != NodeStatus::Pending {
                    continue;
                }
                if self.tolerates_skipped_dependencies(&state.definition, node_def) {
                    continue;
                }
                let skipped_dep = node_def.dependencies.iter().find(|dep| {
                    state
                        .nodes
                        .get(dep.as_str())
                        .map_or(false, |s| s.status.is_skip_class())
                });
                if let Some(dep) = skipped_dep {
                    to_skip.push((
                        node_def.id.clone(),
                        format!("dependency '{dep}' did not complete"),
                    ));
                }
            }
            if to_skip.is_empty() {
                break;
            }
            for (node_id, reason) in to_skip {
                if let Some(node_state) = state.nodes.get_mut(&node_id) {
                    node_state.status = NodeStatus::Skipped;
                    node_state.error = Some(reason.clone());
                    node_state.completed_at = Some(now);
                }
                debug!(workflow_id = %state.id, node_id = %node_id, "{reason}; skipping");
                self.emit_lifecycle(
                    "node.skipped",
                    &state.id,
                    Some(&node_id),
                    json!({ "reason": reason }),
                );
            }
        }
    }

    /// Move dep-satisfied nodes with outstanding waits into WAITING, fail
    /// the ones whose wait timed out, and return the ids whose waits are now
    /// fully satisfied.
    fn evaluate_event_waits(&self, state: &mut WorkflowState, now: DateTime<Utc>) -> HashSet<String> {
        let mut entered: Vec<String> = Vec::new();
        let mut satisfied: HashSet<String> = HashSet::new();
        let mut timed_out: Vec<String> = Vec::new();
        let mut still_missing: Vec<(String, Vec<String>)> = Vec::new();
        let mut satisfying_events = Vec::new();

        for node_def in &state.definition.nodes {
            let Some(waits) = node_def.wait_for_events.as_ref().filter(|w| !w.is_empty()) else {
                continue;
            };
            let Some(node_state) = state.nodes.get(&node_def.id) else {
                continue;
            };
            match node_state.status {
                NodeStatus::Pending if self.dependencies_satisfied(state, node_def) => {
                    entered.push(node_def.id.clone());
                }
                NodeStatus::Waiting => {
                    let since = node_state.started_at.unwrap_or(state.started_at);
                    let missing: Vec<String> = waits
                        .iter()
                        .filter(|event| !self.inner.events.has_occurred(event, Some(since)))
                        .cloned()
                        .collect();

                    if missing.is_empty() {
                        satisfied.insert(node_def.id.clone());
                        for event_type in waits {
                            satisfying_events
                                .extend(self.inner.events.matching(event_type, Some(since)));
                        }
                    } else if wait_timed_out(node_def, since, now) {
                        timed_out.push(node_def.id.clone());
                    } else {
                        still_missing.push((node_def.id.clone(), missing));
                    }
                }
                _ => {}
            }
        }

        for node_id in entered {
            let waits = state
                .definition
                .node(&node_id)
                .and_then(|n| n.wait_for_events.clone());
            if let Some(node_state) = state.nodes.get_mut(&node_id) {
                node_state.status = NodeStatus::Waiting;
                node_state.started_at = Some(now);
                node_state.waiting_for_events = waits;
            }
            info!(workflow_id = %state.id, node_id = %node_id, "node waiting for events");
        }

        for node_id in timed_out {
            if let Some(node_state) = state.nodes.get_mut(&node_id) {
                node_state.status = NodeStatus::Failed;
                node_state.error = Some("event wait timeout".to_owned());
                node_state.completed_at = Some(now);
            }
            warn!(workflow_id = %state.id, node_id = %node_id, "event wait timeout");
            self.emit_lifecycle(
                "node.failed",
                &state.id,
                Some(&node_id),
                json!({ "error": "event wait timeout" }),
            );
        }

        for (node_id, missing) in still_missing {
            if let Some(node_state) = state.nodes.get_mut(&node_id) {
                node_state.waiting_for_events = Some(missing);
            }
        }

        for node_id in &satisfied {
            if let Some(node_state) = state.nodes.get_mut(node_id) {
                node_state.waiting_for_events = None;
            }
        }

        // Keep the satisfying events in the persisted history.
        for record in satisfying_events {
            if !state.events.iter().any(|e| e.id == record.id) {
                state.events.push(record);
            }
        }
        let limit = self.inner.config.event_history_limit;
        if state.events.len() > limit {
            let excess = state.events.len() - limit;
            state.events.drain(..excess);
        }

        satisfied
    }

    fn dependencies_satisfied(&self, state: &WorkflowState, node: &NodeDefinition) -> bool {
        let tolerate = self.tolerates_skipped_dependencies(&state.definition, node);
        node.dependencies.iter().all(|dep| {
            match state.nodes.get(dep).map(|s| s.status) {
                Some(NodeStatus::Completed) => true,
                Some(status) if status.is_skip_class() => tolerate,
                _ => false,
            }
        })
    }

    fn tolerates_skipped_dependencies(
        &self,
        definition: &WorkflowDefinition,
        node: &NodeDefinition,
    ) -> bool {
        let policy = self.effective_policy(definition, node);
        policy.strategy == FailureStrategy::GracefulDegradation
            && policy
                .graceful_degradation
                .as_ref()
                .map_or(true, |gd| gd.continue_on_node_failure && !gd.skip_dependent_nodes)
    }

    fn effective_policy(
        &self,
        definition: &WorkflowDefinition,
        node: &NodeDefinition,
    ) -> FailureHandlingConfig {
        node.failure_handling
            .clone()
            .or_else(|| definition.failure_handling.clone())
            .unwrap_or_else(|| self.inner.config.default_failure_handling.clone())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(
        &self,
        state: &WorkflowState,
        ready: &[String],
        cancel: Option<&broadcast::Sender<()>>,
    ) -> Vec<NodeOutcome> {
        let tasks = ready.iter().filter_map(|node_id| {
            let node_def = state.definition.node(node_id)?.clone();
            let policy = self.effective_policy(&state.definition, &node_def);
            let retry = node_def
                .retry
                .clone()
                .unwrap_or_else(|| self.inner.config.default_retry.clone());
            let prior_attempts = state.nodes.get(node_id).map_or(0, |s| s.attempts);
            let context = self.compose_node_context(state, &node_def);
            let cancel_rx = cancel.map(|tx| tx.subscribe());
            Some(self.execute_node(
                state.id.clone(),
                node_def,
                policy,
                retry,
                prior_attempts,
                context,
                cancel_rx,
            ))
        });

        let cap = self
            .inner
            .config
            .max_parallel
            .unwrap_or_else(|| ready.len().max(1));
        futures::stream::iter(tasks)
            .buffer_unordered(cap.max(1))
            .collect()
            .await
    }

    /// Context snapshot a handler sees: the shared workflow context plus its
    /// dependencies' results.
    fn compose_node_context(&self, state: &WorkflowState, node: &NodeDefinition) -> Context {
        let mut context = state.context.clone();
        if !node.dependencies.is_empty() {
            let results: serde_json::Map<String, Value> = node
                .dependencies
                .iter()
                .map(|dep| {
                    let result = state
                        .nodes
                        .get(dep)
                        .and_then(|s| s.result.clone())
                        .unwrap_or(Value::Null);
                    (dep.clone(), result)
                })
                .collect();
            context.insert(DEPENDENCY_RESULTS_KEY.to_owned(), Value::Object(results));
        }
        context
    }

    // -----------------------------------------------------------------------
    // Node execution
    // -----------------------------------------------------------------------

    /// One attempt of one node: circuit-breaker gate, handler (or subflow)
    /// invocation bounded by the node timeout, then policy classification of
    /// any failure.
    #[allow(clippy::too_many_arguments)]
    async fn execute_node(
        &self,
        workflow_id: String,
        node: NodeDefinition,
        policy: FailureHandlingConfig,
        retry: RetryConfig,
        prior_attempts: u32,
        context: Context,
        cancel: Option<broadcast::Receiver<()>>,
    ) -> NodeOutcome {
        let attempt = prior_attempts + 1;

        let gated = !self
            .inner
            .failure
            .attempt_allowed(&workflow_id, &node.id, &policy);
        let mut cancelled = false;

        let attempt_result: Result<Value, String> = if gated {
            debug!(workflow_id = %workflow_id, node_id = %node.id, "circuit open; refusing attempt");
            Err("circuit open".to_owned())
        } else {
            let work = self.attempt_node(&workflow_id, &node, &context, attempt);
            let bounded = bound_by_timeout(work, node.timeout_ms);
            match cancel {
                Some(mut cancel_rx) => {
                    tokio::select! {
                        _ = cancel_rx.recv() => {
                            cancelled = true;
                            Err("execution cancelled".to_owned())
                        }
                        result = bounded => result,
                    }
                }
                None => bounded.await,
            }
        };

        match attempt_result {
            Ok(result) => {
                self.inner
                    .failure
                    .record_success(&workflow_id, &node.id, &policy);
                info!(workflow_id = %workflow_id, node_id = %node.id, attempt, "node completed");
                NodeOutcome {
                    node_id: node.id,
                    status: NodeStatus::Completed,
                    attempts: attempt,
                    result: Some(result),
                    error: None,
                    next_attempt_not_before: None,
                }
            }
            Err(error) => {
                if cancelled {
                    warn!(workflow_id = %workflow_id, node_id = %node.id, "cancelled mid-execution");
                    return NodeOutcome {
                        node_id: node.id,
                        status: NodeStatus::Failed,
                        attempts: attempt,
                        result: None,
                        error: Some(error),
                        next_attempt_not_before: None,
                    };
                }

                // Open-breaker rejections don't count toward the rolling
                // failure window.
                if !gated {
                    self.inner
                        .failure
                        .record_failure(&workflow_id, &node.id, &policy, &error);
                }

                let decision = self.inner.failure.decide(
                    &workflow_id,
                    &node.id,
                    &policy,
                    &retry,
                    attempt,
                    &error,
                );
                self.outcome_for_failure(workflow_id, node, attempt, error, decision, &policy)
            }
        }
    }

    fn outcome_for_failure(
        &self,
        workflow_id: String,
        node: NodeDefinition,
        attempt: u32,
        error: String,
        decision: FailureDecision,
        policy: &FailureHandlingConfig,
    ) -> NodeOutcome {
        match decision {
            FailureDecision::Retry { delay } => {
                warn!(
                    workflow_id = %workflow_id, node_id = %node.id,
                    "attempt {attempt} failed ({error}); retrying in {delay:?}"
                );
                NodeOutcome {
                    node_id: node.id,
                    status: NodeStatus::Pending,
                    attempts: attempt,
                    result: None,
                    error: Some(error),
                    next_attempt_not_before: Some(
                        Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64),
                    ),
                }
            }
            FailureDecision::Fail => {
                error!(workflow_id = %workflow_id, node_id = %node.id, "node failed: {error}");
                NodeOutcome {
                    node_id: node.id,
                    status: NodeStatus::Failed,
                    attempts: attempt,
                    result: None,
                    error: Some(error),
                    next_attempt_not_before: None,
                }
            }
            FailureDecision::Skip => {
                warn!(workflow_id = %workflow_id, node_id = %node.id, "retries exhausted; skipping: {error}");
                NodeOutcome {
                    node_id: node.id,
                    status: NodeStatus::Skipped,
                    attempts: attempt,
                    result: None,
                    error: Some(error),
                    next_attempt_not_before: None,
                }
            }
            FailureDecision::DeadLetter => {
                self.inner.failure.dead_letter(
                    DeadLetterEntry {
                        workflow_id: workflow_id.clone(),
                        node_id: node.id.clone(),
                        error: error.clone(),
                        attempts: attempt,
                        inputs: node.inputs.clone(),
                        enqueued_at: Utc::now(),
                    },
                    policy,
                );
                NodeOutcome {
                    node_id: node.id,
                    status: NodeStatus::DeadLettered,
                    attempts: attempt,
                    result: None,
                    error: Some(error),
                    next_attempt_not_before: None,
                }
            }
            FailureDecision::Fallback(value) => {
                info!(workflow_id = %workflow_id, node_id = %node.id, "substituting fallback result");
                NodeOutcome {
                    node_id: node.id,
                    status: NodeStatus::Completed,
                    attempts: attempt,
                    result: Some(value),
                    error: None,
                    next_attempt_not_before: None,
                }
            }
        }
    }

    async fn attempt_node(
        &self,
        workflow_id: &str,
        node: &NodeDefinition,
        context: &Context,
        attempt: u32,
    ) -> Result<Value, String> {
        if node.node_type == "subflow" {
            return self.run_subflow_node(workflow_id, node, context).await;
        }

        let Some(handler) = self.inner.registry.resolve(&node.node_type) else {
            return Err(format!("unknown node type: {}", node.node_type));
        };

        let call = NodeCall {
            workflow_id: workflow_id.to_owned(),
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            attempt,
        };
        handler
            .execute(&call, context, &node.inputs)
            .await
            .map_err(|err| err.to_string())
    }

    /// Run a subflow node: expand, execute the child recursively, summarise.
    async fn run_subflow_node(
        &self,
        parent_id: &str,
        node: &NodeDefinition,
        context: &Context,
    ) -> Result<Value, String> {
        let prepared = subflow::prepare(
            &self.inner.subflows,
            parent_id,
            node,
            context,
            self.inner.config.default_subflow_max_depth,
        )?;
        let child_id = prepared.child_id.clone();
        info!(parent = %parent_id, node_id = %node.id, child = %child_id, "expanding subflow");

        let child = self
            .execute_definition(child_id.clone(), prepared.definition, prepared.context)
            .await
            .map_err(|err| err.to_string())?;

        match child.status {
            WorkflowStatus::Completed => Ok(json!({
                "childId": child_id,
                "status": child.status,
                "duration": child.duration_ms,
                "nodeResults": child.node_results,
                "completedNodes": child.completed_nodes,
                "failureCount": child.failure_count,
            })),
            WorkflowStatus::Failed => {
                Err(child
                    .error
                    .unwrap_or_else(|| format!("subflow '{child_id}' failed")))
            }
            _ => Err(format!("subflow '{child_id}' suspended waiting for events")),
        }
    }

    // -----------------------------------------------------------------------
    // Outcome merge
    // -----------------------------------------------------------------------

    fn apply_outcome(&self, state: &mut WorkflowState, outcome: NodeOutcome) {
        let workflow_id = state.id.clone();
        let Some(node_state) = state.nodes.get_mut(&outcome.node_id) else {
            return;
        };
        node_state.attempts = outcome.attempts;
        node_state.status = outcome.status;
        node_state.next_attempt_not_before = outcome.next_attempt_not_before;

        match outcome.status {
            NodeStatus::Completed => {
                node_state.result = outcome.result;
                node_state.error = None;
                node_state.completed_at = Some(Utc::now());
                self.emit_lifecycle("node.completed", &workflow_id, Some(&outcome.node_id), json!({}));
            }
            NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::DeadLettered => {
                node_state.error = outcome.error.clone();
                node_state.completed_at = Some(Utc::now());
                let event_type = match outcome.status {
                    NodeStatus::Failed => "node.failed",
                    NodeStatus::Skipped => "node.skipped",
                    _ => "node.dead-lettered",
                };
                self.emit_lifecycle(
                    event_type,
                    &workflow_id,
                    Some(&outcome.node_id),
                    json!({ "error": outcome.error }),
                );
            }
            // Retry scheduled: back to PENDING, keeping the last error for
            // observability.
            NodeStatus::Pending => {
                node_state.error = outcome.error;
            }
            _ => {}
        }
    }

    fn snapshot_failure_metrics(&self, state: &mut WorkflowState) {
        let node_ids: Vec<String> = state.nodes.keys().cloned().collect();
        let snapshot = self.inner.failure.snapshot_for(&state.id, node_ids.iter());
        if !snapshot.is_empty() {
            state.failure_metrics = Some(snapshot);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cancellation_signalled(receiver: &mut broadcast::Receiver<()>) -> bool {
    matches!(
        receiver.try_recv(),
        Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_))
    )
}

fn has_event_waits(node: &NodeDefinition) -> bool {
    node.wait_for_events.as_ref().map_or(false, |w| !w.is_empty())
}

fn wait_timed_out(node: &NodeDefinition, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    node.timeout_ms
        .map_or(false, |timeout_ms| {
            now - since >= chrono::Duration::milliseconds(timeout_ms as i64)
        })
}

/// First FAILED node in definition order, with a workflow-level reason.
fn first_failed(state: &WorkflowState) -> Option<(String, String)> {
    state.definition.nodes.iter().find_map(|node_def| {
        state.nodes.get(&node_def.id).and_then(|node_state| {
            (node_state.status == NodeStatus::Failed).then(|| {
                let detail = node_state
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_owned());
                (node_def.id.clone(), format!("node '{}' failed: {detail}", node_def.id))
            })
        })
    })
}

async fn bound_by_timeout<F>(work: F, timeout_ms: Option<u64>) -> Result<Value, String>
where
    F: std::future::Future<Output = Result<Value, String>>,
{
    match timeout_ms {
        Some(ms) => {
            match tokio::time::timeout(std::time::Duration::from_millis(ms), work).await {
                Ok(result) => result,
                Err(_) => Err("node execution timeout".to_owned()),
            }
        }
        None => work.await,
    }
}
