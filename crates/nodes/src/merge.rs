//! `merge` — a bundled plugin that joins parallel branches.
//!
//! The scheduler runs a merge node once every dependency has reached a
//! terminal-successful state, exposing each dependency's result under
//! `context.dependencyResults`.  The strategy then decides whether the join
//! counts as satisfied; an unsatisfied strategy fails the node with a
//! dependency-failed error, which the engine treats like any other handler
//! error.
//!
//! A dependency result counts as failed when it is an object carrying an
//! `error` key, or `success: false`.  Anything else is a success.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::traits::{Context, NodeCall, NodeHandler, DEPENDENCY_RESULTS_KEY};
use crate::NodeError;

/// How many successful dependencies a merge needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Every dependency must have succeeded.
    All,
    /// At least one dependency must have succeeded.
    Any,
    /// Strictly more than half of the dependencies must have succeeded.
    Majority,
    /// At least `count` dependencies must have succeeded.
    Count(usize),
}

impl MergeStrategy {
    fn satisfied(self, succeeded: usize, total: usize) -> bool {
        match self {
            Self::All => succeeded == total,
            Self::Any => succeeded >= 1,
            Self::Majority => succeeded * 2 > total,
            Self::Count(n) => succeeded >= n,
        }
    }
}

pub struct MergeNode;

impl MergeNode {
    fn strategy_from(inputs: &Context) -> Result<MergeStrategy, NodeError> {
        let name = inputs
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or("ALL");

        match name.to_ascii_uppercase().as_str() {
            "ALL" => Ok(MergeStrategy::All),
            "ANY" => Ok(MergeStrategy::Any),
            "MAJORITY" => Ok(MergeStrategy::Majority),
            "COUNT" => {
                let count = inputs.get("count").and_then(Value::as_u64).ok_or_else(|| {
                    NodeError::InvalidInput(
                        "merge strategy COUNT requires a numeric 'count' input".into(),
                    )
                })?;
                Ok(MergeStrategy::Count(count as usize))
            }
            other => Err(NodeError::InvalidInput(format!(
                "unknown merge strategy '{other}'"
            ))),
        }
    }

    fn is_failure(result: &Value) -> bool {
        match result {
            Value::Object(fields) => {
                fields.get("error").is_some_and(|e| !e.is_null())
                    || fields.get("success") == Some(&Value::Bool(false))
            }
            _ => false,
        }
    }
}

#[async_trait]
impl NodeHandler for MergeNode {
    async fn execute(
        &self,
        _call: &NodeCall,
        context: &Context,
        inputs: &Context,
    ) -> Result<Value, NodeError> {
        let strategy = Self::strategy_from(inputs)?;

        let empty = Map::new();
        let dependency_results = context
            .get(DEPENDENCY_RESULTS_KEY)
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let total = dependency_results.len();
        let mut merged = Map::new();
        let mut failed: Vec<&str> = Vec::new();

        for (dep_id, result) in dependency_results {
            if Self::is_failure(result) {
                failed.push(dep_id);
            } else {
                merged.insert(dep_id.clone(), result.clone());
            }
        }

        let succeeded = total - failed.len();
        if !strategy.satisfied(succeeded, total) {
            return Err(NodeError::Failed(format!(
                "dependency failed: {succeeded} of {total} dependencies succeeded ({:?} unsatisfied, failing: {})",
                strategy,
                failed.join(", "),
            )));
        }

        Ok(json!({
            "satisfied": succeeded,
            "total": total,
            "merged": Value::Object(merged),
        }))
    }
}
