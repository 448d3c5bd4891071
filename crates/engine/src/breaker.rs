//! Per-node-identity circuit breaker.
//!
//! State machine: CLOSED → OPEN → HALF_OPEN → CLOSED.
//!
//! - CLOSED counts failures inside a rolling `time_window`; reaching
//!   `failure_threshold` opens the breaker.
//! - OPEN rejects every attempt without invoking the handler until
//!   `recovery_timeout` has elapsed, then the next attempt transitions to
//!   HALF_OPEN.
//! - HALF_OPEN permits trial executions; `success_threshold` consecutive
//!   successes close the breaker, any failure re-opens it.
//!
//! The struct is serialisable so breaker state can be persisted alongside a
//! node's failure metrics and restored after a process restart.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreaker {
    pub state: BreakerState,
    /// Failure timestamps inside the rolling window (CLOSED state only).
    #[serde(default)]
    failures: Vec<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    consecutive_successes: u32,
}

impl CircuitBreaker {
    /// May an attempt proceed right now?  An expired OPEN state moves to
    /// HALF_OPEN as a side effect.
    pub fn allow(&mut self, config: &CircuitBreakerConfig, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let recovery = Duration::milliseconds(config.recovery_timeout as i64);
                let expired = self
                    .opened_at
                    .map_or(true, |opened_at| now - opened_at >= recovery);
                if expired {
                    self.state = BreakerState::HalfOpen;
                    self.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self, config: &CircuitBreakerConfig) {
        if self.state == BreakerState::HalfOpen {
            self.consecutive_successes += 1;
            if self.consecutive_successes >= config.success_threshold {
                self.state = BreakerState::Closed;
                self.failures.clear();
                self.opened_at = None;
                self.consecutive_successes = 0;
            }
        }
    }

    /// Record a failed attempt.  Returns `true` when this failure opened the
    /// breaker.
    pub fn record_failure(&mut self, config: &CircuitBreakerConfig, now: DateTime<Utc>) -> bool {
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(now);
                self.failures.clear();
                self.consecutive_successes = 0;
                true
            }
            BreakerState::Closed => {
                let window = Duration::milliseconds(config.time_window as i64);
                self.failures.push(now);
                self.failures.retain(|stamp| now - *stamp <= window);

                if self.failures.len() as u32 >= config.failure_threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(now);
                    true
                } else {
                    false
                }
            }
            BreakerState::Open => false,
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            time_window: 60_000,
            recovery_timeout: 1_000,
            success_threshold: 2,
            monitoring_window: None,
        }
    }

    #[test]
    fn opens_after_threshold_failures_in_window() {
        let config = config();
        let mut breaker = CircuitBreaker::default();
        let now = Utc::now();

        assert!(!breaker.record_failure(&config, now));
        assert_eq!(breaker.state, BreakerState::Closed);

        assert!(breaker.record_failure(&config, now));
        assert_eq!(breaker.state, BreakerState::Open);
        assert!(!breaker.allow(&config, now));
    }

    #[test]
    fn failures_outside_the_window_age_out() {
        let config = config();
        let mut breaker = CircuitBreaker::default();
        let start = Utc::now();

        breaker.record_failure(&config, start);
        // Second failure arrives after the window has rolled past the first.
        let later = start + Duration::milliseconds(config.time_window as i64 + 1);
        assert!(!breaker.record_failure(&config, later));
        assert_eq!(breaker.state, BreakerState::Closed);
    }

    #[test]
    fn open_breaker_half_opens_after_recovery_timeout() {
        let config = config();
        let mut breaker = CircuitBreaker::default();
        let now = Utc::now();
        breaker.record_failure(&config, now);
        breaker.record_failure(&config, now);

        // Still inside recovery: rejected.
        assert!(!breaker.allow(&config, now + Duration::milliseconds(500)));
        assert_eq!(breaker.state, BreakerState::Open);

        // Recovery elapsed: trial permitted, state is half-open.
        assert!(breaker.allow(&config, now + Duration::milliseconds(1_001)));
        assert_eq!(breaker.state, BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_consecutive_successes() {
        let config = config();
        let mut breaker = CircuitBreaker::default();
        let now = Utc::now();
        breaker.record_failure(&config, now);
        breaker.record_failure(&config, now);
        assert!(breaker.allow(&config, now + Duration::milliseconds(1_001)));

        breaker.record_success(&config);
        assert_eq!(breaker.state, BreakerState::HalfOpen);
        breaker.record_success(&config);
        assert_eq!(breaker.state, BreakerState::Closed);
        assert!(breaker.allow(&config, now + Duration::milliseconds(1_002)));
    }

    #[test]
    fn half_open_failure_reopens() {
        let config = config();
        let mut breaker = CircuitBreaker::default();
        let now = Utc::now();
        breaker.record_failure(&config, now);
        breaker.record_failure(&config, now);
        assert!(breaker.allow(&config, now + Duration::milliseconds(1_001)));

        let reopened_at = now + Duration::milliseconds(1_100);
        assert!(breaker.record_failure(&config, reopened_at));
        assert_eq!(breaker.state, BreakerState::Open);
        // A fresh recovery period starts from the re-open.
        assert!(!breaker.allow(&config, reopened_at + Duration::milliseconds(500)));
        assert!(breaker.allow(&config, reopened_at + Duration::milliseconds(1_001)));
    }

    #[test]
    fn breaker_state_round_trips_through_json() {
        let config = config();
        let mut breaker = CircuitBreaker::default();
        let now = Utc::now();
        breaker.record_failure(&config, now);
        breaker.record_failure(&config, now);

        let doc = serde_json::to_value(&breaker).unwrap();
        assert_eq!(doc["state"], "OPEN");

        let mut restored: CircuitBreaker = serde_json::from_value(doc).unwrap();
        assert!(!restored.allow(&config, now + Duration::milliseconds(500)));
    }
}
