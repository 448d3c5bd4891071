//! DAG validation — runs before any state is created or persisted.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every dependency must reference an existing node.
//! 3. The dependency graph must be acyclic (topological sort must succeed).
//! 4. Subflow nodes must name a target workflow.
//!
//! Returns a topologically-sorted list of node IDs on success.  The
//! scheduler does not execute in this order — readiness is re-evaluated
//! every round — but a successful sort proves the graph can make progress.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{models::WorkflowDefinition, EngineError};

/// Validate the workflow's dependency graph and return nodes in a valid
/// topological order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownDependency`] if a node depends on a missing node.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
/// - [`EngineError::MissingSubflowTarget`] if a subflow node names no child.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &definition.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate dependency references and subflow targets
    // -----------------------------------------------------------------------
    for node in &definition.nodes {
        for dependency in &node.dependencies {
            if !seen_ids.contains(dependency.as_str()) {
                return Err(EngineError::UnknownDependency {
                    node_id: node.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        if node.node_type == "subflow"
            && node.subflow_id.is_none()
            && node.subflow_definition.is_none()
        {
            return Err(EngineError::MissingSubflowTarget(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm) over dependency edges
    // -----------------------------------------------------------------------
    // Edge direction: dependency → dependent.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &definition.nodes {
        dependents.entry(node.id.as_str()).or_default();
        in_degree.insert(node.id.as_str(), node.dependencies.len());
        for dependency in &node.dependencies {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(node.id.as_str());
        }
    }

    // Seed the queue with nodes that have no dependencies.
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(definition.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(next) = dependents.get(node_id) {
            for &dependent in next {
                let degree = in_degree.entry(dependent).or_insert(0);
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle.
    if sorted.len() != definition.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeDefinition;

    fn make_node(id: &str, dependencies: &[&str]) -> NodeDefinition {
        NodeDefinition::new(id, "data").with_dependencies(dependencies)
    }

    fn make_definition(nodes: Vec<NodeDefinition>) -> WorkflowDefinition {
        WorkflowDefinition::new("wf-test", "test", nodes)
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // a → b → c
        let definition = make_definition(vec![
            make_node("a", &[]),
            make_node("b", &["a"]),
            make_node("c", &["b"]),
        ]);

        let sorted = validate_definition(&definition).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let definition = make_definition(vec![
            make_node("a", &[]),
            make_node("b", &["a"]),
            make_node("c", &["a"]),
            make_node("d", &["b", "c"]),
        ]);

        let sorted = validate_definition(&definition).expect("should be valid");
        // 'a' must be first, 'd' must be last.
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let definition = make_definition(vec![make_node("a", &[]), make_node("a", &[])]);
        assert!(matches!(
            validate_definition(&definition),
            Err(EngineError::DuplicateNodeId(id)) if id == "a"
        ));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let definition = make_definition(vec![make_node("a", &["ghost"])]);
        assert!(matches!(
            validate_definition(&definition),
            Err(EngineError::UnknownDependency { dependency, .. }) if dependency == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // a → b → c → a  (cycle!)
        let definition = make_definition(vec![
            make_node("a", &["c"]),
            make_node("b", &["a"]),
            make_node("c", &["b"]),
        ]);
        assert!(matches!(
            validate_definition(&definition),
            Err(EngineError::CycleDetected)
        ));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let definition = make_definition(vec![make_node("a", &["a"])]);
        assert!(matches!(
            validate_definition(&definition),
            Err(EngineError::CycleDetected)
        ));
    }

    #[test]
    fn single_node_no_dependencies_is_valid() {
        let definition = make_definition(vec![make_node("solo", &[])]);
        let sorted = validate_definition(&definition).expect("single node should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }

    #[test]
    fn subflow_node_without_a_target_is_rejected() {
        let definition = make_definition(vec![NodeDefinition::new("call", "subflow")]);
        assert!(matches!(
            validate_definition(&definition),
            Err(EngineError::MissingSubflowTarget(id)) if id == "call"
        ));
    }
}
