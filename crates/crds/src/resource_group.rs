//! ResourceGroup CRD
//!
//! Groups an arbitrary set of Kubernetes objects and reports a status per object.

use crate::identity::ResourceIdentity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kpt.dev",
    version = "v1alpha1",
    kind = "ResourceGroup",
    namespaced,
    status = "ResourceGroupStatus",
    shortname = "rg"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupSpec {
    /// Objects that belong to this group
    #[serde(default)]
    pub resources: Vec<ResourceIdentity>,

    /// Informational description of the group's origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Type of the package or source the group came from
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Revision of the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupStatus {
    /// Generation of the spec these statuses were computed for
    #[serde(default)]
    pub observed_generation: i64,

    /// One entry per `spec.resources` item, in spec order
    #[serde(default)]
    pub resource_statuses: Vec<ResourceStatus>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// API group of the resource
    #[serde(default)]
    pub group: String,

    /// Kind of the resource
    pub kind: String,

    /// Namespace of the resource
    #[serde(default)]
    pub namespace: String,

    /// Name of the resource
    pub name: String,

    /// Observed state of the resource
    pub status: ResourceState,

    /// Human readable detail for non-current states
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResourceStatus {
    /// Build a status entry for `identity`
    pub fn new(identity: &ResourceIdentity, status: ResourceState, message: Option<String>) -> Self {
        Self {
            group: identity.group.clone(),
            kind: identity.kind.clone(),
            namespace: identity.namespace.clone(),
            name: identity.name.clone(),
            status,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
/// Observed state of one grouped resource
///
/// Serializes as PascalCase ("Current", "NotFound", etc.).
#[serde(rename_all = "PascalCase")]
pub enum ResourceState {
    /// Resource is being rolled out
    InProgress,

    /// Resource reported a failure
    Failed,

    /// Resource is fully reconciled
    Current,

    /// Resource is being deleted
    Terminating,

    /// Resource does not exist
    NotFound,

    /// Status could not be determined
    #[default]
    Unknown,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Failed => "Failed",
            Self::Current => "Current",
            Self::Terminating => "Terminating",
            Self::NotFound => "NotFound",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}
