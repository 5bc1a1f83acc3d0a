//! Actual vs expected comparison
//!
//! Only fields the expected state declares are compared, and
//! provider-generated fields are never compared at all.

use crate::resource::ResourceState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-generated fields excluded from comparison
pub const IGNORED_FIELDS: &[&str] = &[
    "id",
    "created_at",
    "updated_at",
    "status",
    "public_ip",
    "private_ip",
    "ipv6",
    "urn",
    "fingerprint",
    "region",
    "zone",
];

/// One field that differs between actual and expected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

impl std::fmt::Display for FieldChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.from, self.to)
    }
}

pub type FieldSet = Vec<FieldChange>;

/// What has to happen to a resource. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "fields", rename_all = "snake_case")]
pub enum Diff {
    NoChange,
    Create,
    Update(FieldSet),
    Delete,
    /// Delete then create; an immutable field changed
    Replace(FieldSet),
}

impl Diff {
    pub fn tag(&self) -> &'static str {
        match self {
            Diff::NoChange => "no-change",
            Diff::Create => "create",
            Diff::Update(_) => "update",
            Diff::Delete => "delete",
            Diff::Replace(_) => "replace",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange)
    }

    /// Whether re-running after a failure while applying this diff is safe.
    ///
    /// A replace that failed between its delete and its create has destroyed
    /// the old object, so the operator has to look before retrying.
    pub fn is_retry_safe(&self) -> bool {
        !matches!(self, Diff::Replace(_))
    }

    pub fn fields(&self) -> &[FieldChange] {
        match self {
            Diff::Update(fields) | Diff::Replace(fields) => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldChange> {
        self.fields().iter().find(|c| c.field == name)
    }
}

impl std::fmt::Display for Diff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diff::Update(fields) | Diff::Replace(fields) => {
                let fields: Vec<String> = fields.iter().map(|c| c.to_string()).collect();
                write!(f, "{}({})", self.tag(), fields.join(", "))
            }
            _ => write!(f, "{}", self.tag()),
        }
    }
}

/// Fields declared in `expected` whose value differs in `actual`.
///
/// A field the provider does not report is not compared.
pub fn changed_fields(actual: &ResourceState, expected: &ResourceState) -> FieldSet {
    expected
        .properties
        .iter()
        .filter(|(field, _)| !IGNORED_FIELDS.contains(&field.as_str()))
        .filter_map(|(field, to)| {
            let from = actual.properties.get(field)?;
            (from != to).then(|| FieldChange {
                field: field.clone(),
                from: from.clone(),
                to: to.clone(),
            })
        })
        .collect()
}

/// Diff one resource
pub fn compute_diff(actual: Option<&ResourceState>, expected: &ResourceState) -> Diff {
    let Some(actual) = actual else {
        return Diff::Create;
    };

    let changes = changed_fields(actual, expected);
    if changes.is_empty() {
        Diff::NoChange
    } else if changes.iter().any(|c| expected.kind.is_immutable(&c.field)) {
        Diff::Replace(changes)
    } else {
        Diff::Update(changes)
    }
}

/// Immutable fields where the provider diverged from the last converged
/// snapshot while the definition kept the snapshot's value.
///
/// Such a change was made outside this tool, so it must not be silently
/// overwritten by a replace.
pub fn drifted_fields(
    baseline: &ResourceState,
    actual: &ResourceState,
    expected: &ResourceState,
) -> Vec<String> {
    expected
        .kind
        .immutable_fields()
        .iter()
        .filter(|field| {
            match (
                baseline.property(field),
                actual.property(field),
                expected.property(field),
            ) {
                (Some(before), Some(now), Some(wanted)) => before == wanted && now != before,
                _ => false,
            }
        })
        .map(|field| field.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterflow_core::ResourceKind;

    fn network(cidr: &str) -> ResourceState {
        ResourceState::new(ResourceKind::Network, "vpc-1", "demo-net").with_property("cidr", cidr)
    }

    fn pool(count: u32, size: &str) -> ResourceState {
        ResourceState::new(ResourceKind::ServerPool, "demo-workers", "demo-workers")
            .with_property("count", count)
            .with_property("size", size)
    }

    #[test]
    fn test_missing_actual_is_create() {
        assert_eq!(compute_diff(None, &network("10.0.0.0/16")), Diff::Create);
    }

    #[test]
    fn test_equal_is_no_change() {
        let actual = network("10.0.0.0/16").with_attribute("status", "active");
        assert_eq!(
            compute_diff(Some(&actual), &network("10.0.0.0/16")),
            Diff::NoChange
        );
    }

    #[test]
    fn test_mutable_field_is_update() {
        let diff = compute_diff(Some(&pool(1, "small")), &pool(3, "small"));

        assert_eq!(
            diff,
            Diff::Update(vec![FieldChange {
                field: "count".into(),
                from: 1.into(),
                to: 3.into(),
            }])
        );
        assert!(diff.is_retry_safe());
        assert_eq!(diff.to_string(), "update(count: 1 -> 3)");
    }

    #[test]
    fn test_immutable_field_is_replace() {
        let diff = compute_diff(Some(&pool(3, "small")), &pool(3, "large"));

        assert!(matches!(diff, Diff::Replace(_)));
        assert!(!diff.is_retry_safe());
        assert!(diff.field("size").is_some());
    }

    #[test]
    fn test_undeclared_and_ignored_fields_not_compared() {
        let actual = network("10.0.0.0/16")
            .with_property("description", "set by hand")
            .with_property("status", "pending");
        let expected = network("10.0.0.0/16").with_property("status", "active");

        assert_eq!(compute_diff(Some(&actual), &expected), Diff::NoChange);
    }

    #[test]
    fn test_drift_detected_when_definition_unchanged() {
        let baseline = network("10.0.0.0/16");
        let actual = network("10.9.0.0/16");
        let expected = network("10.0.0.0/16");

        assert_eq!(drifted_fields(&baseline, &actual, &expected), vec!["cidr"]);
    }

    #[test]
    fn test_no_drift_when_definition_explains_change() {
        let baseline = network("10.0.0.0/16");
        let actual = network("10.0.0.0/16");
        let expected = network("10.1.0.0/16");

        assert!(drifted_fields(&baseline, &actual, &expected).is_empty());
    }
}
