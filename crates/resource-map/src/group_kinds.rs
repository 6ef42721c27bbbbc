//! Group/kind extraction from a ResourceGroup spec.

use crds::{GroupKind, ResourceIdentity};
use std::collections::HashSet;

/// Returns the distinct group/kind pairs referenced by `resources`.
///
/// The watch manager keeps exactly one watch per returned pair.
pub fn extract_group_kinds(resources: &[ResourceIdentity]) -> HashSet<GroupKind> {
    resources.iter().map(ResourceIdentity::group_kind).collect()
}
