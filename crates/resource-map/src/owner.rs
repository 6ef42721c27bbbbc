//! Owner references
//!
//! An `OwnerRef` names the ResourceGroup that references a resource. The group
//! and the resources it lists may live in different namespaces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace and name of a ResourceGroup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerRef {
    /// Namespace of the group
    pub namespace: String,
    /// Name of the group
    pub name: String,
}

impl OwnerRef {
    /// Create a new owner reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
