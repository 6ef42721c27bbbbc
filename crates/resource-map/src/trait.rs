//! ResourceMapping trait for substituting the resource map
//!
//! The event handler only needs to read owners and the status reconciler only
//! needs to write cached statuses. Tests implement this trait with fixed
//! answers instead of building a full `ResourceMap`.

use crate::owner::OwnerRef;
use crate::status::CachedStatus;
use crds::{GroupKind, ResourceIdentity};
use std::collections::HashSet;

/// Read and status-update operations over a resource-to-owner index.
///
/// Implementations must be safe to call from many watch tasks at once.
pub trait ResourceMapping: Send + Sync {
    /// Current owners of `identity`, in registration order. Empty if none.
    fn get(&self, identity: &ResourceIdentity) -> Vec<OwnerRef>;

    /// Identities currently registered under `gk`
    fn resources_of_kind(&self, gk: &GroupKind) -> HashSet<ResourceIdentity>;

    /// Store the status of `identity`
    fn set_status(&self, identity: &ResourceIdentity, status: CachedStatus);
}
