//! Subflow expansion: executing a referenced workflow as a child node.
//!
//! A subflow node resolves to a child definition (inline definition wins
//! over a registry lookup), checks depth and cycle bounds against the call
//! stack threaded through the parent context, derives a unique child
//! workflow id, and builds the child's initial context.  The executor then
//! runs the child recursively and merges a summary back into the parent
//! node's result.

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{NodeDefinition, WorkflowDefinition};
use nodes::Context;

/// Context key the expansion bookkeeping travels under.
pub const SUBFLOW_CONTEXT_KEY: &str = "__subflow_execution_context";

/// Call-stack bookkeeping threaded from parent to child context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubflowExecutionContext {
    /// Definition ids of every subflow currently on the call path.
    pub call_stack: Vec<String>,
    pub max_depth: usize,
}

/// Registry of child workflow definitions addressable by `subflow_id`.
#[derive(Default)]
pub struct SubflowRegistry {
    definitions: DashMap<String, WorkflowDefinition>,
}

impl SubflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a child definition under its own id.
    pub fn register(&self, definition: WorkflowDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    pub fn resolve(&self, subflow_id: &str) -> Option<WorkflowDefinition> {
        self.definitions
            .get(subflow_id)
            .map(|entry| entry.value().clone())
    }
}

/// Everything the executor needs to run a child workflow.
pub(crate) struct PreparedSubflow {
    pub child_id: String,
    pub definition: WorkflowDefinition,
    pub context: Context,
}

/// Resolve and bound a subflow call.  Errors are node-failure messages, not
/// engine errors — the failure policy classifies them like any handler
/// error.
pub(crate) fn prepare(
    registry: &SubflowRegistry,
    parent_workflow_id: &str,
    node: &NodeDefinition,
    parent_context: &Context,
    default_max_depth: usize,
) -> Result<PreparedSubflow, String> {
    let definition = node
        .subflow_definition
        .as_deref()
        .cloned()
        .or_else(|| {
            node.subflow_id
                .as_deref()
                .and_then(|subflow_id| registry.resolve(subflow_id))
        })
        .ok_or_else(|| match &node.subflow_id {
            Some(subflow_id) => format!("unknown subflow id '{subflow_id}'"),
            None => "subflow node has neither an inline definition nor a subflow id".to_owned(),
        })?;

    let mut execution_context = parent_context
        .get(SUBFLOW_CONTEXT_KEY)
        .and_then(|value| serde_json::from_value::<SubflowExecutionContext>(value.clone()).ok())
        .unwrap_or_else(|| SubflowExecutionContext {
            call_stack: Vec::new(),
            max_depth: node.subflow_max_depth.unwrap_or(default_max_depth),
        });

    let stack_path = |stack: &[String]| {
        let mut path = stack.to_vec();
        path.push(definition.id.clone());
        path.join(" -> ")
    };

    if execution_context.call_stack.len() >= execution_context.max_depth {
        return Err(format!(
            "maximum subflow depth exceeded ({}): {}",
            execution_context.max_depth,
            stack_path(&execution_context.call_stack)
        ));
    }
    if execution_context.call_stack.contains(&definition.id) {
        return Err(format!(
            "circular subflow reference: {}",
            stack_path(&execution_context.call_stack)
        ));
    }
    execution_context.call_stack.push(definition.id.clone());

    let child_id = derive_child_id(parent_workflow_id, &node.id, &definition.id);

    // Child context: parent ⊕ node inputs ⊕ subflow context ⊕ updated
    // execution context (later keys win).
    let mut context = parent_context.clone();
    context.extend(node.inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(extra) = &node.subflow_context {
        context.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    let encoded = serde_json::to_value(&execution_context)
        .map_err(|err| format!("failed to encode subflow execution context: {err}"))?;
    context.insert(SUBFLOW_CONTEXT_KEY.to_owned(), encoded);

    Ok(PreparedSubflow {
        child_id,
        definition,
        context,
    })
}

/// `{parentId}.{nodeId}.{subflowId}.{epochMillis}.{random6}` — unique per
/// expansion, so retries and repeated calls never collide in storage.
pub(crate) fn derive_child_id(parent_id: &str, node_id: &str, subflow_id: &str) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6).map(|_| HEX[rng.gen_range(0..16)] as char).collect();
    format!(
        "{parent_id}.{node_id}.{subflow_id}.{}.{suffix}",
        Utc::now().timestamp_millis()
    )
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn child_definition(id: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(id, id, vec![NodeDefinition::new("inner", "data")])
    }

    fn subflow_node(subflow_id: &str) -> NodeDefinition {
        NodeDefinition::new("call", "subflow").with_subflow_id(subflow_id)
    }

    #[test]
    fn inline_definition_wins_over_registry_lookup() {
        let registry = SubflowRegistry::new();
        registry.register(child_definition("shared"));

        let node = NodeDefinition::new("call", "subflow")
            .with_subflow_id("shared")
            .with_subflow_definition(child_definition("inline"));

        let prepared = prepare(&registry, "parent", &node, &Context::new(), 10).unwrap();
        assert_eq!(prepared.definition.id, "inline");
    }

    #[test]
    fn unknown_subflow_id_fails_with_a_clear_message() {
        let registry = SubflowRegistry::new();
        let err = prepare(&registry, "parent", &subflow_node("ghost"), &Context::new(), 10)
            .unwrap_err();
        assert!(err.contains("unknown subflow id 'ghost'"));
    }

    #[test]
    fn child_id_carries_the_full_lineage() {
        let registry = SubflowRegistry::new();
        registry.register(child_definition("child"));

        let prepared =
            prepare(&registry, "parent", &subflow_node("child"), &Context::new(), 10).unwrap();

        let parts: Vec<&str> = prepared.child_id.split('.').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "parent");
        assert_eq!(parts[1], "call");
        assert_eq!(parts[2], "child");
        assert!(parts[3].parse::<i64>().is_ok(), "epoch millis: {}", parts[3]);
        assert_eq!(parts[4].len(), 6);
    }

    #[test]
    fn depth_bound_is_enforced_with_the_stack_path() {
        let registry = SubflowRegistry::new();
        registry.register(child_definition("child"));

        let mut parent_context = Context::new();
        parent_context.insert(
            SUBFLOW_CONTEXT_KEY.to_owned(),
            json!({ "callStack": ["a", "b"], "maxDepth": 2 }),
        );

        let err = prepare(&registry, "parent", &subflow_node("child"), &parent_context, 10)
            .unwrap_err();
        assert!(err.contains("maximum subflow depth exceeded"));
        assert!(err.contains("a -> b -> child"));
    }

    #[test]
    fn circular_reference_is_rejected_with_the_stack_path() {
        let registry = SubflowRegistry::new();
        registry.register(child_definition("child"));

        let mut parent_context = Context::new();
        parent_context.insert(
            SUBFLOW_CONTEXT_KEY.to_owned(),
            json!({ "callStack": ["child"], "maxDepth": 10 }),
        );

        let err = prepare(&registry, "parent", &subflow_node("child"), &parent_context, 10)
            .unwrap_err();
        assert!(err.contains("circular subflow reference"));
        assert!(err.contains("child -> child"));
    }

    #[test]
    fn child_context_layering_later_keys_win() {
        let registry = SubflowRegistry::new();
        registry.register(child_definition("child"));

        let mut parent_context = Context::new();
        parent_context.insert("shared".to_owned(), json!("from-parent"));
        parent_context.insert("kept".to_owned(), json!("parent-only"));

        let node = subflow_node("child")
            .with_input("shared", json!("from-inputs"))
            .with_input("input_only", json!(1));
        let node = NodeDefinition {
            subflow_context: Some(Context::from_iter([(
                "shared".to_owned(),
                json!("from-subflow-context"),
            )])),
            ..node
        };

        let prepared = prepare(&registry, "parent", &node, &parent_context, 10).unwrap();

        assert_eq!(prepared.context["shared"], "from-subflow-context");
        assert_eq!(prepared.context["kept"], "parent-only");
        assert_eq!(prepared.context["input_only"], 1);

        let execution: SubflowExecutionContext =
            serde_json::from_value(prepared.context[SUBFLOW_CONTEXT_KEY].clone()).unwrap();
        assert_eq!(execution.call_stack, vec!["child"]);
    }
}
