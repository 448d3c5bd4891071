//! Failure policy engine: retry schedule, circuit-breaker state, dead
//! letter queue, metrics, and alerts.
//!
//! The scheduler reports every attempt outcome here and asks for a
//! [`FailureDecision`] when an attempt fails.  Breaker state and metrics are
//! keyed by `(workflow id, node id)` in process-wide concurrent maps, so
//! identical node identities across sequential runs of the same workflow
//! share one breaker.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::models::{FailureHandlingConfig, FailureStrategy, RetryConfig};
use nodes::Context;

/// Rolling window for failure-rate monitoring when the config leaves it
/// unset, in milliseconds.
const DEFAULT_MONITORING_WINDOW_MS: u64 = 300_000;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Per-node failure bookkeeping, persisted inside workflow state so a resume
/// after restart can restore it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailureMetrics {
    pub total_attempts: u32,
    pub total_failures: u32,
    pub total_successes: u32,
    /// Attempt timestamps inside the monitoring window.
    #[serde(default)]
    recent_attempts: Vec<DateTime<Utc>>,
    /// Failure timestamps inside the monitoring window.
    #[serde(default)]
    recent_failures: Vec<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
}

impl NodeFailureMetrics {
    pub fn failures_in_window(&self) -> usize {
        self.recent_failures.len()
    }

    fn prune(&mut self, window_ms: u64, now: DateTime<Utc>) {
        let window = chrono::Duration::milliseconds(window_ms as i64);
        self.recent_attempts.retain(|stamp| now - *stamp <= window);
        self.recent_failures.retain(|stamp| now - *stamp <= window);
    }

    fn rolling_failure_rate(&self) -> Option<f64> {
        if self.recent_attempts.is_empty() {
            None
        } else {
            Some(self.recent_failures.len() as f64 / self.recent_attempts.len() as f64)
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions and alerts
// ---------------------------------------------------------------------------

/// What the scheduler should do with a node whose attempt just failed.
#[derive(Debug, Clone)]
pub enum FailureDecision {
    /// Keep the node PENDING and try again after `delay`.
    Retry { delay: Duration },
    /// Fail the node (and therefore the workflow).
    Fail,
    /// Mark the node SKIPPED.
    Skip,
    /// Push to the dead letter queue and mark the node DEAD_LETTERED.
    DeadLetter,
    /// Complete the node with a configured fallback result.
    Fallback(Value),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Alert {
    HighFailureRate {
        workflow_id: String,
        node_id: String,
        rate: f64,
        threshold: f64,
    },
    CircuitOpen {
        workflow_id: String,
        node_id: String,
    },
    PoisonMessage {
        workflow_id: String,
        node_id: String,
        attempts: u32,
    },
    DlqThreshold {
        size: usize,
        threshold: usize,
    },
}

/// A node whose terminal failure exceeded its retry budget, retained for
/// out-of-band reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub workflow_id: String,
    pub node_id: String,
    pub error: String,
    pub attempts: u32,
    pub inputs: Context,
    pub enqueued_at: DateTime<Utc>,
}

pub type AlertHandler = dyn Fn(&Alert) + Send + Sync;
pub type DeadLetterHandler = dyn Fn(&DeadLetterEntry) + Send + Sync;

// ---------------------------------------------------------------------------
// FailureEngine
// ---------------------------------------------------------------------------

pub struct FailureEngine {
    entries: DashMap<String, NodeFailureMetrics>,
    dlq: Mutex<VecDeque<DeadLetterEntry>>,
    alert_handler: RwLock<Option<Arc<AlertHandler>>>,
    dead_letter_handler: RwLock<Option<Arc<DeadLetterHandler>>>,
}

fn entry_key(workflow_id: &str, node_id: &str) -> String {
    format!("{workflow_id}::{node_id}")
}

impl FailureEngine {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            dlq: Mutex::new(VecDeque::new()),
            alert_handler: RwLock::new(None),
            dead_letter_handler: RwLock::new(None),
        }
    }

    /// Install the callback alerts are pushed to.  Panics inside the
    /// callback are swallowed with a warning.
    pub fn set_alert_handler(&self, handler: impl Fn(&Alert) + Send + Sync + 'static) {
        *self.alert_handler.write().unwrap() = Some(Arc::new(handler));
    }

    /// Install a callback invoked for every dead-lettered node.
    pub fn set_dead_letter_handler(
        &self,
        handler: impl Fn(&DeadLetterEntry) + Send + Sync + 'static,
    ) {
        *self.dead_letter_handler.write().unwrap() = Some(Arc::new(handler));
    }

    // -----------------------------------------------------------------------
    // Attempt bookkeeping
    // -----------------------------------------------------------------------

    /// Circuit-breaker gate consulted before each attempt.  `false` means
    /// the attempt must fail immediately with "circuit open" and no handler
    /// call.
    pub fn attempt_allowed(
        &self,
        workflow_id: &str,
        node_id: &str,
        policy: &FailureHandlingConfig,
    ) -> bool {
        if policy.strategy != FailureStrategy::CircuitBreaker {
            return true;
        }
        let Some(config) = &policy.circuit_breaker else {
            return true;
        };

        let mut entry = self
            .entries
            .entry(entry_key(workflow_id, node_id))
            .or_default();
        entry
            .circuit_breaker
            .get_or_insert_with(CircuitBreaker::default)
            .allow(config, Utc::now())
    }

    pub fn record_success(
        &self,
        workflow_id: &str,
        node_id: &str,
        policy: &FailureHandlingConfig,
    ) {
        let now = Utc::now();
        let mut entry = self
            .entries
            .entry(entry_key(workflow_id, node_id))
            .or_default();
        entry.total_attempts += 1;
        entry.total_successes += 1;
        entry.recent_attempts.push(now);
        entry.prune(monitoring_window(policy), now);

        if policy.strategy == FailureStrategy::CircuitBreaker {
            if let (Some(config), Some(breaker)) =
                (&policy.circuit_breaker, entry.circuit_breaker.as_mut())
            {
                breaker.record_success(config);
            }
        }
    }

    /// Record a real handler failure.  Rejections by an open breaker must
    /// not be reported here — they don't count toward the rolling window.
    pub fn record_failure(
        &self,
        workflow_id: &str,
        node_id: &str,
        policy: &FailureHandlingConfig,
        error: &str,
    ) {
        let now = Utc::now();

        // Entry guard must drop before any alert callback runs.
        let (opened, rate) = {
            let mut entry = self
                .entries
                .entry(entry_key(workflow_id, node_id))
                .or_default();
            entry.total_attempts += 1;
            entry.total_failures += 1;
            entry.last_error = Some(error.to_owned());
            entry.recent_attempts.push(now);
            entry.recent_failures.push(now);
            entry.prune(monitoring_window(policy), now);

            let mut opened = false;
            if policy.strategy == FailureStrategy::CircuitBreaker {
                if let Some(config) = &policy.circuit_breaker {
                    opened = entry
                        .circuit_breaker
                        .get_or_insert_with(CircuitBreaker::default)
                        .record_failure(config, now);
                }
            }
            (opened, entry.rolling_failure_rate())
        };

        if opened {
            self.alert(Alert::CircuitOpen {
                workflow_id: workflow_id.to_owned(),
                node_id: node_id.to_owned(),
            });
        }

        if let Some(monitoring) = &policy.monitoring {
            if monitoring.enabled && monitoring.alerting_enabled {
                if let Some(rate) = rate {
                    if rate > monitoring.failure_rate_threshold {
                        self.alert(Alert::HighFailureRate {
                            workflow_id: workflow_id.to_owned(),
                            node_id: node_id.to_owned(),
                            rate,
                            threshold: monitoring.failure_rate_threshold,
                        });
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Decision
    // -----------------------------------------------------------------------

    /// Decide what happens to a node whose attempt number `attempts`
    /// (1-indexed, cumulative) just failed with `error`.
    pub fn decide(
        &self,
        workflow_id: &str,
        node_id: &str,
        policy: &FailureHandlingConfig,
        retry: &RetryConfig,
        attempts: u32,
        error: &str,
    ) -> FailureDecision {
        // Poison detection overrides everything, including scheduled
        // retries.
        if let Some(threshold) = policy.poison_message_threshold {
            let total = self
                .entries
                .get(&entry_key(workflow_id, node_id))
                .map(|entry| entry.total_attempts)
                .unwrap_or(attempts);
            if total > threshold {
                self.alert(Alert::PoisonMessage {
                    workflow_id: workflow_id.to_owned(),
                    node_id: node_id.to_owned(),
                    attempts: total,
                });
                return FailureDecision::DeadLetter;
            }
        }

        let mut max_attempts = retry.max_attempts;
        if policy.strategy == FailureStrategy::RetryAndDlq {
            if let Some(cap) = policy.dead_letter.as_ref().and_then(|dl| dl.max_retries) {
                max_attempts = max_attempts.min(cap);
            }
        }

        let can_retry = attempts < max_attempts && is_retryable(error, retry);

        match policy.strategy {
            FailureStrategy::FailFast => FailureDecision::Fail,
            FailureStrategy::RetryAndFail | FailureStrategy::CircuitBreaker => {
                if can_retry {
                    FailureDecision::Retry {
                        delay: retry_delay(retry, attempts),
                    }
                } else {
                    FailureDecision::Fail
                }
            }
            FailureStrategy::RetryAndSkip => {
                if can_retry {
                    FailureDecision::Retry {
                        delay: retry_delay(retry, attempts),
                    }
                } else {
                    FailureDecision::Skip
                }
            }
            FailureStrategy::RetryAndDlq => {
                if can_retry {
                    FailureDecision::Retry {
                        delay: retry_delay(retry, attempts),
                    }
                } else if policy.dead_letter.as_ref().map_or(true, |dl| dl.enabled) {
                    FailureDecision::DeadLetter
                } else {
                    FailureDecision::Skip
                }
            }
            FailureStrategy::GracefulDegradation => {
                if can_retry {
                    FailureDecision::Retry {
                        delay: retry_delay(retry, attempts),
                    }
                } else {
                    let fallback = policy
                        .graceful_degradation
                        .as_ref()
                        .and_then(|gd| gd.fallback_results.get(node_id))
                        .cloned();
                    match fallback {
                        Some(value) => FailureDecision::Fallback(value),
                        None => FailureDecision::Skip,
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dead letter queue
    // -----------------------------------------------------------------------

    pub fn dead_letter(&self, entry: DeadLetterEntry, policy: &FailureHandlingConfig) {
        let handler = self.dead_letter_handler.read().unwrap().clone();
        let dl_config = policy.dead_letter.as_ref();

        let size = {
            let mut dlq = self.dlq.lock().unwrap();
            if let Some(retention_ms) = dl_config.and_then(|dl| dl.retention_period) {
                let cutoff = Utc::now() - chrono::Duration::milliseconds(retention_ms as i64);
                dlq.retain(|old| old.enqueued_at >= cutoff);
            }
            dlq.push_back(entry.clone());
            dlq.len()
        };

        warn!(
            workflow_id = %entry.workflow_id,
            node_id = %entry.node_id,
            attempts = entry.attempts,
            "node dead-lettered: {}",
            entry.error
        );

        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(&entry))).is_err() {
                warn!("dead letter handler panicked; ignoring");
            }
        }

        if let Some(threshold) = dl_config.and_then(|dl| dl.alert_threshold) {
            if size > threshold {
                self.alert(Alert::DlqThreshold { size, threshold });
            }
        }
    }

    /// A copy of the current dead letter queue, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dlq.lock().unwrap().iter().cloned().collect()
    }

    /// Remove and return every dead letter entry, for reprocessing.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dlq.lock().unwrap().drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn metrics(&self, workflow_id: &str, node_id: &str) -> Option<NodeFailureMetrics> {
        self.entries
            .get(&entry_key(workflow_id, node_id))
            .map(|entry| entry.value().clone())
    }

    /// Metrics for every listed node of a workflow, keyed by node id.  Used
    /// to embed a snapshot in persisted state.
    pub fn snapshot_for<'a>(
        &self,
        workflow_id: &str,
        node_ids: impl Iterator<Item = &'a String>,
    ) -> HashMap<String, NodeFailureMetrics> {
        node_ids
            .filter_map(|node_id| {
                self.metrics(workflow_id, node_id)
                    .map(|metrics| (node_id.clone(), metrics))
            })
            .collect()
    }

    /// Seed the registry from a persisted snapshot.  Live entries win over
    /// persisted ones.
    pub fn restore(
        &self,
        workflow_id: &str,
        snapshot: Option<&HashMap<String, NodeFailureMetrics>>,
    ) {
        let Some(snapshot) = snapshot else { return };
        for (node_id, metrics) in snapshot {
            self.entries
                .entry(entry_key(workflow_id, node_id))
                .or_insert_with(|| metrics.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    pub fn alert(&self, alert: Alert) {
        warn!(?alert, "failure alert");
        let handler = self.alert_handler.read().unwrap().clone();
        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(&alert))).is_err() {
                warn!("alert handler panicked; ignoring");
            }
        }
    }
}

impl Default for FailureEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Retry schedule
// ---------------------------------------------------------------------------

fn monitoring_window(policy: &FailureHandlingConfig) -> u64 {
    policy
        .monitoring
        .as_ref()
        .and_then(|m| m.retention_period)
        .unwrap_or(DEFAULT_MONITORING_WINDOW_MS)
}

/// Delay before the attempt after attempt number `attempt` (1-indexed):
/// `min(max_delay, delay * multiplier^(attempt-1))`, optionally jittered by
/// a uniform factor in [0.5, 1.5].
pub fn retry_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base = retry.delay as f64 * retry.backoff_multiplier.powi(exponent);
    let capped = match retry.max_delay {
        Some(max_delay) => base.min(max_delay as f64),
        None => base,
    };
    let factor = if retry.jitter {
        rand::thread_rng().gen_range(0.5..=1.5)
    } else {
        1.0
    };
    Duration::from_millis((capped * factor).round().max(0.0) as u64)
}

/// An error is retryable iff it matches no `non_retryable_errors` entry AND
/// either `retryable_errors` is unset or it matches one entry.  Matching is
/// case-insensitive substring.
pub fn is_retryable(error: &str, retry: &RetryConfig) -> bool {
    let error = error.to_lowercase();
    if retry
        .non_retryable_errors
        .iter()
        .any(|pattern| error.contains(&pattern.to_lowercase()))
    {
        return false;
    }
    match &retry.retryable_errors {
        None => true,
        Some(patterns) => patterns
            .iter()
            .any(|pattern| error.contains(&pattern.to_lowercase())),
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeadLetterConfig, GracefulDegradationConfig, MonitoringConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            delay: 10,
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        }
    }

    fn policy(strategy: FailureStrategy) -> FailureHandlingConfig {
        FailureHandlingConfig::with_strategy(strategy)
    }

    // ------ Retry schedule ------

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = retry(5);
        assert_eq!(retry_delay(&retry, 1), Duration::from_millis(10));
        assert_eq!(retry_delay(&retry, 2), Duration::from_millis(20));
        assert_eq!(retry_delay(&retry, 3), Duration::from_millis(40));
    }

    #[test]
    fn backoff_is_capped_by_max_delay() {
        let retry = RetryConfig {
            max_delay: Some(25),
            ..retry(5)
        };
        assert_eq!(retry_delay(&retry, 3), Duration::from_millis(25));
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half() {
        let retry = RetryConfig {
            jitter: true,
            ..retry(5)
        };
        for _ in 0..100 {
            let delay = retry_delay(&retry, 2); // base 20ms
            assert!(delay >= Duration::from_millis(10), "{delay:?}");
            assert!(delay <= Duration::from_millis(30), "{delay:?}");
        }
    }

    // ------ Retryable matching ------

    #[test]
    fn non_retryable_patterns_take_precedence() {
        let retry = RetryConfig {
            retryable_errors: Some(vec!["timeout".into()]),
            non_retryable_errors: vec!["auth".into()],
            ..retry(3)
        };
        assert!(!is_retryable("Auth Timeout", &retry));
        assert!(is_retryable("connect timeout", &retry));
        assert!(!is_retryable("connection refused", &retry));
    }

    #[test]
    fn unset_retryable_list_allows_everything() {
        let retry = retry(3);
        assert!(is_retryable("anything at all", &retry));
    }

    // ------ Decisions ------

    #[test]
    fn fail_fast_never_retries() {
        let engine = FailureEngine::new();
        let decision = engine.decide("wf", "n", &policy(FailureStrategy::FailFast), &retry(3), 1, "boom");
        assert!(matches!(decision, FailureDecision::Fail));
    }

    #[test]
    fn retry_and_fail_retries_until_exhausted_then_fails() {
        let engine = FailureEngine::new();
        let policy = policy(FailureStrategy::RetryAndFail);
        assert!(matches!(
            engine.decide("wf", "n", &policy, &retry(3), 1, "boom"),
            FailureDecision::Retry { .. }
        ));
        assert!(matches!(
            engine.decide("wf", "n", &policy, &retry(3), 3, "boom"),
            FailureDecision::Fail
        ));
    }

    #[test]
    fn retry_and_skip_skips_on_exhaustion() {
        let engine = FailureEngine::new();
        let decision = engine.decide(
            "wf",
            "n",
            &policy(FailureStrategy::RetryAndSkip),
            &retry(2),
            2,
            "boom",
        );
        assert!(matches!(decision, FailureDecision::Skip));
    }

    #[test]
    fn retry_and_dlq_dead_letters_on_exhaustion() {
        let engine = FailureEngine::new();
        let decision = engine.decide(
            "wf",
            "n",
            &policy(FailureStrategy::RetryAndDlq),
            &retry(1),
            1,
            "boom",
        );
        assert!(matches!(decision, FailureDecision::DeadLetter));
    }

    #[test]
    fn disabled_dead_letter_queue_downgrades_to_skip() {
        let engine = FailureEngine::new();
        let mut policy = policy(FailureStrategy::RetryAndDlq);
        policy.dead_letter = Some(DeadLetterConfig {
            enabled: false,
            ..DeadLetterConfig::default()
        });
        let decision = engine.decide("wf", "n", &policy, &retry(1), 1, "boom");
        assert!(matches!(decision, FailureDecision::Skip));
    }

    #[test]
    fn dead_letter_max_retries_caps_the_budget() {
        let engine = FailureEngine::new();
        let mut policy = policy(FailureStrategy::RetryAndDlq);
        policy.dead_letter = Some(DeadLetterConfig {
            max_retries: Some(2),
            ..DeadLetterConfig::default()
        });
        // Retry config allows 5, dead letter caps at 2.
        let decision = engine.decide("wf", "n", &policy, &retry(5), 2, "boom");
        assert!(matches!(decision, FailureDecision::DeadLetter));
    }

    #[test]
    fn graceful_degradation_substitutes_configured_fallback() {
        let engine = FailureEngine::new();
        let mut policy = policy(FailureStrategy::GracefulDegradation);
        policy.graceful_degradation = Some(GracefulDegradationConfig {
            fallback_results: HashMap::from([("pref".to_owned(), json!({ "theme": "default" }))]),
            ..GracefulDegradationConfig::default()
        });

        let decision = engine.decide("wf", "pref", &policy, &retry(1), 1, "boom");
        match decision {
            FailureDecision::Fallback(value) => assert_eq!(value["theme"], "default"),
            other => panic!("expected fallback, got {other:?}"),
        }

        // No fallback configured for this node id: falls back to skip.
        let decision = engine.decide("wf", "other", &policy, &retry(1), 1, "boom");
        assert!(matches!(decision, FailureDecision::Skip));
    }

    #[test]
    fn non_retryable_error_short_circuits_the_retry_budget() {
        let engine = FailureEngine::new();
        let retry = RetryConfig {
            non_retryable_errors: vec!["fatal".into()],
            ..retry(5)
        };
        let decision = engine.decide(
            "wf",
            "n",
            &policy(FailureStrategy::RetryAndFail),
            &retry,
            1,
            "fatal: disk gone",
        );
        assert!(matches!(decision, FailureDecision::Fail));
    }

    // ------ Poison detection ------

    #[test]
    fn poison_threshold_forces_dead_letter_and_alerts() {
        let engine = FailureEngine::new();
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let alerts_clone = alerts.clone();
        engine.set_alert_handler(move |alert| {
            alerts_clone.lock().unwrap().push(format!("{alert:?}"));
        });

        let mut policy = policy(FailureStrategy::RetryAndFail);
        policy.poison_message_threshold = Some(2);

        for _ in 0..3 {
            engine.record_failure("wf", "n", &policy, "boom");
        }

        // Retries would still be in budget, but poison wins.
        let decision = engine.decide("wf", "n", &policy, &retry(10), 3, "boom");
        assert!(matches!(decision, FailureDecision::DeadLetter));
        assert!(alerts
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.contains("PoisonMessage")));
    }

    // ------ Alerts & DLQ ------

    #[test]
    fn panicking_alert_handler_is_swallowed() {
        let engine = FailureEngine::new();
        engine.set_alert_handler(|_| panic!("handler bug"));
        engine.alert(Alert::DlqThreshold {
            size: 10,
            threshold: 5,
        });
        // Reaching this line is the assertion.
    }

    #[test]
    fn high_failure_rate_alert_fires_when_monitoring_enabled() {
        let engine = FailureEngine::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        engine.set_alert_handler(move |alert| {
            if matches!(alert, Alert::HighFailureRate { .. }) {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut policy = policy(FailureStrategy::RetryAndFail);
        policy.monitoring = Some(MonitoringConfig {
            enabled: true,
            failure_rate_threshold: 0.5,
            alerting_enabled: true,
            metrics_collection_interval: None,
            retention_period: None,
        });

        engine.record_failure("wf", "n", &policy, "boom");
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn dlq_retains_entries_and_fires_threshold_alert() {
        let engine = FailureEngine::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        engine.set_alert_handler(move |alert| {
            if matches!(alert, Alert::DlqThreshold { .. }) {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut policy = policy(FailureStrategy::RetryAndDlq);
        policy.dead_letter = Some(DeadLetterConfig {
            alert_threshold: Some(1),
            ..DeadLetterConfig::default()
        });

        for i in 0..2 {
            engine.dead_letter(
                DeadLetterEntry {
                    workflow_id: "wf".into(),
                    node_id: format!("n{i}"),
                    error: "boom".into(),
                    attempts: 3,
                    inputs: Context::new(),
                    enqueued_at: Utc::now(),
                },
                &policy,
            );
        }

        assert_eq!(engine.dead_letters().len(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert_eq!(engine.drain_dead_letters().len(), 2);
        assert!(engine.dead_letters().is_empty());
    }

    #[test]
    fn metrics_snapshot_restores_across_engines() {
        let engine = FailureEngine::new();
        let policy = policy(FailureStrategy::RetryAndFail);
        engine.record_failure("wf", "n", &policy, "boom");
        engine.record_success("wf", "n", &policy);

        let node_ids = vec!["n".to_owned()];
        let snapshot = engine.snapshot_for("wf", node_ids.iter());
        assert_eq!(snapshot["n"].total_attempts, 2);
        assert_eq!(snapshot["n"].total_failures, 1);
        assert_eq!(snapshot["n"].total_successes, 1);

        let fresh = FailureEngine::new();
        fresh.restore("wf", Some(&snapshot));
        assert_eq!(fresh.metrics("wf", "n").unwrap().total_attempts, 2);
    }
}
