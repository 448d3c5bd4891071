//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory.  They serialise to the wire shape the storage adapters persist:
//! camelCase keys, upper-case status strings, ISO-8601 timestamps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::failure::NodeFailureMetrics;
use nodes::Context;

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition — immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Stable identifier.  Doubles as the workflow id of top-level runs.
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    /// Workflow-level default failure handling; nodes may override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_handling: Option<FailureHandlingConfig>,
}

fn default_version() -> String {
    "1.0.0".to_owned()
}

impl WorkflowDefinition {
    /// Convenience constructor for building definitions in code and tests.
    pub fn new(id: impl Into<String>, name: impl Into<String>, nodes: Vec<NodeDefinition>) -> Self {
        Self {
            id: id.into(),
            version: default_version(),
            name: name.into(),
            nodes,
            metadata: None,
            failure_handling: None,
        }
    }

    pub fn with_failure_handling(mut self, config: FailureHandlingConfig) -> Self {
        self.failure_handling = Some(config);
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by dependencies).
    pub id: String,
    /// Routes to a registered handler, or to the engine's subflow expander.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Static inputs passed to the handler at execution time.
    #[serde(default)]
    pub inputs: Context,
    /// Ids of nodes that must complete before this node may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Events that must have occurred at or after this node's first entry to
    /// WAITING before it may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "retryConfig")]
    pub retry: Option<RetryConfig>,
    /// Per-execution timeout in milliseconds.  Also bounds event waits.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_handling: Option<FailureHandlingConfig>,

    // ------ Subflow fields (node_type == "subflow") ------
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subflow_id: Option<String>,
    /// Inline child definition.  Takes precedence over `subflow_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subflow_definition: Option<Box<WorkflowDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subflow_context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subflow_max_depth: Option<usize>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            inputs: Context::new(),
            dependencies: Vec::new(),
            wait_for_events: None,
            retry: None,
            timeout_ms: None,
            failure_handling: None,
            subflow_id: None,
            subflow_definition: None,
            subflow_context: None,
            subflow_max_depth: None,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| (*d).to_owned()).collect();
        self
    }

    pub fn with_wait_for_events(mut self, events: &[&str]) -> Self {
        self.wait_for_events = Some(events.iter().map(|e| (*e).to_owned()).collect());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_failure_handling(mut self, config: FailureHandlingConfig) -> Self {
        self.failure_handling = Some(config);
        self
    }

    pub fn with_subflow_id(mut self, subflow_id: impl Into<String>) -> Self {
        self.subflow_id = Some(subflow_id.into());
        self
    }

    pub fn with_subflow_definition(mut self, definition: WorkflowDefinition) -> Self {
        self.subflow_definition = Some(Box::new(definition));
        self
    }

    pub fn with_subflow_max_depth(mut self, max_depth: usize) -> Self {
        self.subflow_max_depth = Some(max_depth);
        self
    }
}

// ---------------------------------------------------------------------------
// Retry configuration
// ---------------------------------------------------------------------------

/// Backoff schedule for failed node attempts.
///
/// Attempt *n* (1-indexed) waits `min(max_delay, delay * multiplier^(n-1))`
/// milliseconds before the next attempt becomes eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub delay: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<u64>,
    /// Multiply each delay by a uniform random factor in [0.5, 1.5].
    #[serde(default)]
    pub jitter: bool,
    /// When set, an error is retryable only if its message matches one entry
    /// (case-insensitive substring).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable_errors: Option<Vec<String>>,
    /// Errors matching any entry are never retried.  Takes precedence over
    /// `retryable_errors`.
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: 1_000,
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: None,
            jitter: false,
            retryable_errors: None,
            non_retryable_errors: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure handling configuration
// ---------------------------------------------------------------------------

/// Per-node failure behaviour.  Resolution order: node override → workflow
/// default → engine default (FAIL_FAST).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureStrategy {
    /// First error fails the node and the workflow.
    FailFast,
    /// Honor the retry schedule, then fail.
    RetryAndFail,
    /// Honor retries; on exhaustion mark the node SKIPPED.
    RetryAndSkip,
    /// Honor retries; on exhaustion push to the dead letter queue.
    RetryAndDlq,
    /// Gate attempts behind a per-node-identity circuit breaker.
    CircuitBreaker,
    /// On exhaustion substitute a configured fallback result.
    GracefulDegradation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureHandlingConfig {
    pub strategy: FailureStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<DeadLetterConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringConfig>,
    /// Cumulative attempts beyond this count force-terminate retries and
    /// dead-letter the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poison_message_threshold: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "gracefulDegradationConfig"
    )]
    pub graceful_degradation: Option<GracefulDegradationConfig>,
}

impl FailureHandlingConfig {
    pub fn with_strategy(strategy: FailureStrategy) -> Self {
        Self {
            strategy,
            circuit_breaker: None,
            dead_letter: None,
            monitoring: None,
            poison_message_threshold: None,
            graceful_degradation: None,
        }
    }

    pub fn fail_fast() -> Self {
        Self::with_strategy(FailureStrategy::FailFast)
    }
}

impl Default for FailureHandlingConfig {
    fn default() -> Self {
        Self::fail_fast()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Failures within `time_window` that trip the breaker.
    pub failure_threshold: u32,
    /// Rolling window, in milliseconds, failures are counted within.
    pub time_window: u64,
    /// Milliseconds an open breaker stays open before permitting a trial.
    pub recovery_timeout: u64,
    /// Consecutive half-open successes required to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_window: Option<u64>,
}

fn default_success_threshold() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Caps the attempts RETRY_AND_DLQ spends before dead-lettering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Entries older than this many milliseconds are pruned on push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<u64>,
    /// DLQ_THRESHOLD alert fires when the queue grows past this size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_threshold: Option<usize>,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            retention_period: None,
            alert_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Rolling failure rate in [0, 1] above which HIGH_FAILURE_RATE fires.
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    #[serde(default = "default_true")]
    pub alerting_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_collection_interval: Option<u64>,
    /// Window, in milliseconds, the rolling rate is computed over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<u64>,
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GracefulDegradationConfig {
    /// When true, dependents of a skipped node still run.
    #[serde(default = "default_true")]
    pub continue_on_node_failure: bool,
    /// When true, dependents of a skipped node are skipped regardless.
    #[serde(default)]
    pub skip_dependent_nodes: bool,
    /// Fallback results keyed by node id, substituted on retry exhaustion.
    #[serde(default)]
    pub fallback_results: HashMap<String, Value>,
}

impl Default for GracefulDegradationConfig {
    fn default() -> Self {
        Self {
            continue_on_node_failure: true,
            skip_dependent_nodes: false,
            fallback_results: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Skipped,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Waiting => write!(f, "WAITING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Skipped,
    DeadLettered,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::DeadLettered
        )
    }

    /// Skip-class states satisfy workflow completion but not plain
    /// dependency readiness.
    pub fn is_skip_class(self) -> bool {
        matches!(self, Self::Skipped | Self::DeadLettered)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Waiting => write!(f, "WAITING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::DeadLettered => write!(f, "DEAD_LETTERED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// Mutable, persisted execution state for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: String,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    pub nodes: HashMap<String, NodeState>,
    /// Shared context, composed by the scheduler between node executions.
    pub context: Context,
    /// Retained event history relevant to this run.
    pub events: Vec<EventRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_metrics: Option<HashMap<String, NodeFailureMetrics>>,
}

impl WorkflowState {
    /// Fresh state for a new run: all nodes pending.
    pub fn new(id: impl Into<String>, definition: WorkflowDefinition, context: Context) -> Self {
        let nodes = definition
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeState::pending()))
            .collect();
        Self {
            id: id.into(),
            definition,
            status: WorkflowStatus::Running,
            nodes,
            context,
            events: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            failure_metrics: None,
        }
    }

    /// Results of every node that produced one, keyed by node id.
    pub fn node_results(&self) -> HashMap<String, Value> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| node.result.clone().map(|r| (id.clone(), r)))
            .collect()
    }

    pub fn count_with_status(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status == status).count()
    }
}

/// Per-node execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Events still outstanding while the node is WAITING.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for_events: Option<Vec<String>>,
    /// Earliest eligible time for the next attempt while backing off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_not_before: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            waiting_for_events: None,
            next_attempt_not_before: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A named event, either user-emitted or an engine lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl EventRecord {
    pub fn new(event_type: impl Into<String>, data: Option<Value>, node_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
            node_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// What a start/resume call hands back to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of this call, in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub node_results: HashMap<String, Value>,
    pub completed_nodes: usize,
    pub failure_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_metrics: Option<HashMap<String, NodeFailureMetrics>>,
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statuses_serialise_as_upper_case_strings() {
        assert_eq!(serde_json::to_value(WorkflowStatus::Waiting).unwrap(), json!("WAITING"));
        assert_eq!(
            serde_json::to_value(NodeStatus::DeadLettered).unwrap(),
            json!("DEAD_LETTERED")
        );
        assert_eq!(
            serde_json::to_value(FailureStrategy::RetryAndDlq).unwrap(),
            json!("RETRY_AND_DLQ")
        );
    }

    #[test]
    fn node_definition_uses_wire_field_names() {
        let node = NodeDefinition::new("a", "data")
            .with_input("m", json!("hi"))
            .with_dependencies(&["b"])
            .with_retry(RetryConfig {
                max_attempts: 2,
                delay: 10,
                ..RetryConfig::default()
            })
            .with_timeout_ms(500);

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "data");
        assert_eq!(value["retryConfig"]["maxAttempts"], 2);
        assert_eq!(value["timeout"], 500);
        assert_eq!(value["dependencies"], json!(["b"]));
    }

    #[test]
    fn state_round_trips_through_json() {
        let definition = WorkflowDefinition::new(
            "wf-1",
            "round trip",
            vec![NodeDefinition::new("a", "data").with_input("x", json!(1))],
        );
        let mut state = WorkflowState::new("wf-1", definition, Context::new());
        state.events.push(EventRecord::new("go", Some(json!({ "n": 1 })), None));
        let node = state.nodes.get_mut("a").unwrap();
        node.status = NodeStatus::Completed;
        node.result = Some(json!({ "x": 1 }));
        node.completed_at = Some(Utc::now());

        let doc = serde_json::to_value(&state).unwrap();
        let restored: WorkflowState = serde_json::from_value(doc.clone()).unwrap();

        // Timestamps re-materialise exactly, nested maps survive.
        assert_eq!(restored.started_at, state.started_at);
        assert_eq!(restored.nodes["a"].completed_at, state.nodes["a"].completed_at);
        assert_eq!(restored.events[0].timestamp, state.events[0].timestamp);
        assert_eq!(serde_json::to_value(&restored).unwrap(), doc);
    }

    #[test]
    fn missing_optional_definition_fields_take_defaults() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "minimal",
            "nodes": [{ "id": "a", "type": "data" }],
        }))
        .unwrap();

        assert_eq!(definition.version, "1.0.0");
        let node = definition.node("a").unwrap();
        assert!(node.dependencies.is_empty());
        assert!(node.retry.is_none());
        assert!(node.wait_for_events.is_none());
    }
}
