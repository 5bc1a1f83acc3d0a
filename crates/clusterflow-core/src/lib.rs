//! ClusterFlow core
//!
//! The declared cluster model, the KDL definition loader, static validation
//! and the dependency graph that orders reconciliation.

pub mod error;
pub mod graph;
pub mod loader;
pub mod model;
pub mod naming;
pub mod parser;
pub mod validate;

pub use error::{ClusterError, Result};
pub use graph::{DependencyGraph, topological_order};
pub use loader::{load_cluster, load_cluster_str};
pub use model::*;
pub use parser::{parse_cluster_file, parse_cluster_string};
pub use validate::validate;
