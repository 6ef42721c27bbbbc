//! Resource identity types
//!
//! A `ResourceIdentity` names one Kubernetes object by API group, kind, namespace
//! and name. It is both the element type of `ResourceGroupSpec.resources` and the
//! key of the in-memory resource map, so equality and hashing are structural.
//!
//! Identities carry no API version.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a single watched resource.
///
/// - `group`: API group, empty for the core group (e.g. `ConfigMap`)
/// - `kind`: Kind of the resource (e.g. "Deployment")
/// - `namespace`: empty for cluster-scoped resources
/// - `name`: object name (required)
#[derive(
    Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentity {
    /// API group of the resource (empty for the core group)
    #[serde(default)]
    pub group: String,

    /// Kind of the resource
    pub kind: String,

    /// Namespace of the resource (empty for cluster-scoped resources)
    #[serde(default)]
    pub namespace: String,

    /// Name of the resource
    pub name: String,
}

impl ResourceIdentity {
    /// Create a new identity from its four parts
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The type half of this identity
    #[must_use]
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }

    /// Whether this identity is of the given type
    #[must_use]
    pub fn is_kind(&self, gk: &GroupKind) -> bool {
        self.group == gk.group && self.kind == gk.kind
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.group_kind(), self.name)
        } else {
            write!(f, "{}/{}/{}", self.group_kind(), self.namespace, self.name)
        }
    }
}

/// A resource type independent of any instance.
#[derive(
    Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub struct GroupKind {
    /// API group (empty for the core group)
    #[serde(default)]
    pub group: String,

    /// Kind
    pub kind: String,
}

impl GroupKind {
    /// Create a new group/kind pair
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Extract the API group from an `apiVersion` string.
///
/// `"apps/v1"` yields `"apps"`, `"v1"` yields the core group `""`.
#[must_use]
pub fn group_of_api_version(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _version)) => group,
        None => "",
    }
}
