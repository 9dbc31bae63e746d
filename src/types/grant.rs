use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single `(resource, action)` grant. Matching is exact: there are no wildcards
/// and no action implies another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub resource: String,
    pub action: String,
}

impl Grant {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        self.resource == resource && self.action == action
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// The effective permission set of a user: the union of the grants of every role held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Grant>);

impl PermissionSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if the set contains exactly this `(resource, action)` pair.
    #[must_use]
    pub fn has(&self, resource: &str, action: &str) -> bool {
        self.0.iter().any(|g| g.matches(resource, action))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Grant::to_string).collect()
    }
}

impl FromIterator<Grant> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Grant>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_strings().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_only() {
        let set: PermissionSet = [Grant::new("task", "update")].into_iter().collect();
        assert!(set.has("task", "update"));
        assert!(!set.has("task", "read"));
        assert!(!set.has("comment", "update"));
    }

    #[test]
    fn test_duplicate_grants_collapse() {
        let set: PermissionSet = [
            Grant::new("task", "create"),
            Grant::new("comment", "create"),
            Grant::new("task", "create"),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        let set: PermissionSet = [Grant::new("task", "create"), Grant::new("comment", "create")]
            .into_iter()
            .collect();
        assert_eq!(set.to_string(), "comment:create, task:create");
    }
}
