//! Built-in `data` and `delay` handlers.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::{Context, NodeCall, NodeHandler};
use crate::NodeError;

/// `data` — echoes the node's static `inputs` map as its result.
///
/// The simplest possible node: useful for seeding values into a graph and as
/// a no-op join point.
pub struct DataNode;

#[async_trait]
impl NodeHandler for DataNode {
    async fn execute(
        &self,
        _call: &NodeCall,
        _context: &Context,
        inputs: &Context,
    ) -> Result<Value, NodeError> {
        Ok(Value::Object(
            inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ))
    }
}

/// `delay` — sleeps `inputs.duration` milliseconds, then reports how long it
/// waited.
pub struct DelayNode;

#[async_trait]
impl NodeHandler for DelayNode {
    async fn execute(
        &self,
        _call: &NodeCall,
        _context: &Context,
        inputs: &Context,
    ) -> Result<Value, NodeError> {
        let duration = inputs
            .get("duration")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                NodeError::InvalidInput("delay node requires a numeric 'duration' input".into())
            })?;

        tokio::time::sleep(std::time::Duration::from_millis(duration)).await;

        Ok(json!({ "delayed": true, "duration": duration }))
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn call() -> NodeCall {
        NodeCall {
            workflow_id: "wf".into(),
            node_id: "n".into(),
            node_type: "data".into(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn data_node_echoes_inputs() {
        let mut inputs: Context = HashMap::new();
        inputs.insert("m".into(), json!("hi"));

        let result = DataNode
            .execute(&call(), &HashMap::new(), &inputs)
            .await
            .unwrap();
        assert_eq!(result["m"], "hi");
    }

    #[tokio::test]
    async fn delay_node_sleeps_and_reports_duration() {
        let mut inputs: Context = HashMap::new();
        inputs.insert("duration".into(), json!(25));

        let before = std::time::Instant::now();
        let result = DelayNode
            .execute(&call(), &HashMap::new(), &inputs)
            .await
            .unwrap();

        assert!(before.elapsed() >= std::time::Duration::from_millis(25));
        assert_eq!(result["delayed"], true);
        assert_eq!(result["duration"], 25);
    }

    #[tokio::test]
    async fn delay_node_rejects_missing_duration() {
        let result = DelayNode
            .execute(&call(), &HashMap::new(), &HashMap::new())
            .await;
        assert!(matches!(result, Err(NodeError::InvalidInput(_))));
    }
}
