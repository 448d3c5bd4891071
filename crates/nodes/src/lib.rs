//! `nodes` crate — the `NodeHandler` trait, the handler registry, and the
//! bundled node implementations.
//!
//! Every node type — built-in and plugin alike — must implement
//! [`NodeHandler`].  The engine crate dispatches execution through this trait
//! object, resolving handlers by type name via [`HandlerRegistry`].

pub mod builtin;
pub mod error;
pub mod merge;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::NodeError;
pub use registry::{HandlerRegistry, RegistryError, RESERVED_TYPES};
pub use traits::{Context, NodeCall, NodeHandler, DEPENDENCY_RESULTS_KEY};
