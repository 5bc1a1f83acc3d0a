//! Planned changes for a cluster

use crate::diff::Diff;
use clusterflow_core::ResourceKind;
use serde::{Deserialize, Serialize};

/// The diff computed for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    /// Logical resource name
    pub name: String,

    pub kind: ResourceKind,

    pub diff: Diff,
}

/// Plan containing the diff of every resource, in apply order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
}

impl Plan {
    pub fn new(changes: Vec<PlannedChange>) -> Self {
        Self { changes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, kind: ResourceKind, diff: Diff) {
        self.changes.push(PlannedChange {
            name: name.into(),
            kind,
            diff,
        });
    }

    /// Whether the plan has any changes
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.diff.is_change())
    }

    pub fn get(&self, name: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.name == name)
    }

    /// Changes whose diff has the given tag ("create", "update", ...)
    pub fn changes_by_tag(&self, tag: &str) -> Vec<&PlannedChange> {
        self.changes.iter().filter(|c| c.diff.tag() == tag).collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        let count = |tag: &str| self.changes_by_tag(tag).len();
        PlanSummary {
            create: count("create"),
            update: count("update"),
            replace: count("replace"),
            delete: count("delete"),
            no_change: count("no-change"),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.no_change
        )
    }
}
