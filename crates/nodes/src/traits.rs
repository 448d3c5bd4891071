//! The `NodeHandler` trait — the contract every node type must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::NodeError;

/// The shared workflow context, as handlers see it: a snapshot composed by
/// the scheduler before each execution.  Handlers never mutate the live map.
///
/// For nodes with dependencies the scheduler adds a `dependencyResults` key
/// mapping each dependency id to its result.
pub type Context = HashMap<String, Value>;

/// Context key under which the scheduler exposes dependency results.
pub const DEPENDENCY_RESULTS_KEY: &str = "dependencyResults";

/// Execution-time identity of the node being run.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// handler implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct NodeCall {
    /// Id of the workflow this execution belongs to.
    pub workflow_id: String,
    /// Id of the node within the workflow.
    pub node_id: String,
    /// Type name the handler was resolved under.
    pub node_type: String,
    /// 1-indexed attempt number for this execution.
    pub attempt: u32,
}

/// The core handler trait.
///
/// All built-in node types and plugins must implement this.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute the node with its static `inputs` and a snapshot of the
    /// workflow `context`, returning the node's JSON result.
    async fn execute(
        &self,
        call: &NodeCall,
        context: &Context,
        inputs: &Context,
    ) -> Result<Value, NodeError>;
}
