//! ClusterFlow cloud abstraction
//!
//! The capability interface providers implement, the per-resource
//! actual/expected model, diffing and snapshot persistence.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               clusterflow-reconciler            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               clusterflow-cloud                 │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait CloudProvider { describe, ... }   │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐ ┌──────────┐ ┌────────────┐   │
//! │  │ResourceModel │ │   Diff   │ │ StateStore │   │
//! │  └──────────────┘ └──────────┘ └────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ sakura-cloud  │ │ digitalocean  │
//! │   provider    │ │   provider    │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod diff;
pub mod error;
pub mod model;
pub mod provider;
pub mod resource;
pub mod state;

pub use action::{Plan, PlanSummary, PlannedChange};
pub use diff::{Diff, FieldChange, FieldSet, compute_diff, drifted_fields};
pub use error::{CloudError, Result};
pub use model::ResourceModel;
pub use provider::{AuthStatus, CloudProvider, RetryConfig};
pub use resource::{CreateRequest, Filter, ResourceState};
pub use state::{FileStateStore, StateLock, StateSnapshot, StateStore};
