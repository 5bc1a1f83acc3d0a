//! Model definitions
//!
//! The cluster aggregate and the resource variants it is made of.

mod cluster;
mod resource;

pub use cluster::*;
pub use resource::*;
