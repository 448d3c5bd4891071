//! `MockNode` — a scripted test double for `NodeHandler`.
//!
//! Useful in unit and integration tests where a real handler is either
//! unavailable or irrelevant.  Records every call so tests can assert
//! attempt counts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{Context, NodeCall, NodeHandler};
use crate::NodeError;

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with the given message on the first `failures` calls, then
    /// return the value on every later call.
    FailTimes {
        failures: u32,
        message: String,
        then: Value,
    },
    /// Fail every call with the given message.
    AlwaysFail(String),
    /// Sleep, then return the value.
    SleepThen { millis: u64, value: Value },
}

/// A mock handler that counts its calls and behaves as scripted.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    behaviour: MockBehaviour,
    calls: Arc<AtomicU32>,
}

impl MockNode {
    /// A mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// A mock that always fails with the given message.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::AlwaysFail(message.into()))
    }

    /// A mock that fails `failures` times, then succeeds with `value`.
    pub fn flaky(
        name: impl Into<String>,
        failures: u32,
        message: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::with_behaviour(
            name,
            MockBehaviour::FailTimes {
                failures,
                message: message.into(),
                then: value,
            },
        )
    }

    /// A mock that sleeps `millis` before succeeding with `value`.
    pub fn slow(name: impl Into<String>, millis: u64, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::SleepThen { millis, value })
    }

    pub fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared counter handle, for asserting after the node has been moved
    /// into a registry.
    pub fn counter(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl NodeHandler for MockNode {
    async fn execute(
        &self,
        _call: &NodeCall,
        _context: &Context,
        _inputs: &Context,
    ) -> Result<Value, NodeError> {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        match &self.behaviour {
            MockBehaviour::ReturnValue(value) => Ok(value.clone()),
            MockBehaviour::FailTimes {
                failures,
                message,
                then,
            } => {
                if call_number <= *failures {
                    Err(NodeError::Failed(message.clone()))
                } else {
                    Ok(then.clone())
                }
            }
            MockBehaviour::AlwaysFail(message) => Err(NodeError::Failed(message.clone())),
            MockBehaviour::SleepThen { millis, value } => {
                tokio::time::sleep(std::time::Duration::from_millis(*millis)).await;
                Ok(value.clone())
            }
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn call() -> NodeCall {
        NodeCall {
            workflow_id: "wf".into(),
            node_id: "m".into(),
            node_type: "mock".into(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn flaky_mock_fails_then_succeeds() {
        let node = MockNode::flaky("flaky", 2, "transient", json!(42));
        let ctx = HashMap::new();

        assert!(node.execute(&call(), &ctx, &ctx).await.is_err());
        assert!(node.execute(&call(), &ctx, &ctx).await.is_err());
        assert_eq!(node.execute(&call(), &ctx, &ctx).await.unwrap(), json!(42));
        assert_eq!(node.call_count(), 3);
    }

    #[tokio::test]
    async fn failing_mock_always_fails() {
        let node = MockNode::failing("broken", "kaput");
        let ctx = HashMap::new();
        for _ in 0..3 {
            assert!(node.execute(&call(), &ctx, &ctx).await.is_err());
        }
        assert_eq!(node.call_count(), 3);
    }
}
