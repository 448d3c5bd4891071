//! Name-to-handler mapping with reserved built-ins.
//!
//! `data` and `delay` are pre-seeded; `subflow` is reserved for the engine,
//! which expands subflow nodes itself and never consults the registry for
//! them.  None of the three may be re-registered.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::builtin::{DataNode, DelayNode};
use crate::NodeHandler;

/// Node types that may not be overridden by plugins.
pub const RESERVED_TYPES: &[&str] = &["data", "delay", "subflow"];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot register reserved node type '{0}'")]
    ReservedType(String),
}

/// Process-wide mapping from `node_type` strings to handlers.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Create a registry with the built-in `data` and `delay` handlers
    /// pre-seeded.
    pub fn new() -> Self {
        let registry = Self {
            handlers: DashMap::new(),
        };
        registry
            .handlers
            .insert("data".to_owned(), Arc::new(DataNode) as Arc<dyn NodeHandler>);
        registry
            .handlers
            .insert("delay".to_owned(), Arc::new(DelayNode) as Arc<dyn NodeHandler>);
        registry
    }

    /// Register a plugin handler under `node_type`.
    ///
    /// # Errors
    /// [`RegistryError::ReservedType`] when `node_type` is one of the
    /// built-ins.
    pub fn register(
        &self,
        node_type: impl Into<String>,
        handler: Arc<dyn NodeHandler>,
    ) -> Result<(), RegistryError> {
        let node_type = node_type.into();
        if RESERVED_TYPES.contains(&node_type.as_str()) {
            return Err(RegistryError::ReservedType(node_type));
        }
        self.handlers.insert(node_type, handler);
        Ok(())
    }

    /// Look up the handler for `node_type`, or `None` when nothing is
    /// registered under that name.
    pub fn resolve(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).map(|entry| entry.value().clone())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;
    use serde_json::json;

    #[test]
    fn built_ins_are_pre_seeded() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve("data").is_some());
        assert!(registry.resolve("delay").is_some());
    }

    #[test]
    fn reserved_types_cannot_be_overridden() {
        let registry = HandlerRegistry::new();
        for reserved in RESERVED_TYPES {
            let result = registry.register(*reserved, Arc::new(MockNode::returning("x", json!({}))));
            assert!(
                matches!(result, Err(RegistryError::ReservedType(ref t)) if t == reserved),
                "expected '{reserved}' to be rejected"
            );
        }
    }

    #[test]
    fn plugins_resolve_after_registration() {
        let registry = HandlerRegistry::new();
        registry
            .register("custom", Arc::new(MockNode::returning("custom", json!({ "ok": true }))))
            .unwrap();
        assert!(registry.resolve("custom").is_some());
    }

    #[test]
    fn unknown_type_resolves_to_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve("no-such-type").is_none());
    }
}
