//! The resource map.
//!
//! Four indices live behind one `RwLock`:
//!
//! - `owners`: identity → owning groups, in first-registration order
//! - `statuses`: identity → cached status
//! - `by_kind`: group/kind → identities of that type
//! - `by_group`: owning group → identities it references
//!
//! Every mutation updates all affected indices under the write lock, so a
//! reader never observes half of a `register` or `deregister`.

use crate::mapping_trait::ResourceMapping;
use crate::owner::OwnerRef;
use crate::status::CachedStatus;
use crds::{GroupKind, ResourceIdentity};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Indices {
    owners: HashMap<ResourceIdentity, Vec<OwnerRef>>,
    statuses: HashMap<ResourceIdentity, CachedStatus>,
    by_kind: HashMap<GroupKind, HashSet<ResourceIdentity>>,
    by_group: HashMap<OwnerRef, HashSet<ResourceIdentity>>,
}

impl Indices {
    /// Adds the edge. Returns false if it already existed.
    fn insert(&mut self, owner: &OwnerRef, identity: &ResourceIdentity) -> bool {
        let owners = self.owners.entry(identity.clone()).or_default();
        if owners.contains(owner) {
            return false;
        }
        owners.push(owner.clone());
        self.by_kind
            .entry(identity.group_kind())
            .or_default()
            .insert(identity.clone());
        self.by_group
            .entry(owner.clone())
            .or_default()
            .insert(identity.clone());
        true
    }

    /// Removes the edge. Returns false if it did not exist.
    ///
    /// Kinds left without any identity are added to `released`. A group left
    /// without any identity is forgotten.
    fn remove(
        &mut self,
        owner: &OwnerRef,
        identity: &ResourceIdentity,
        released: &mut HashSet<GroupKind>,
    ) -> bool {
        let Some(owners) = self.owners.get_mut(identity) else {
            return false;
        };
        let Some(pos) = owners.iter().position(|o| o == owner) else {
            return false;
        };
        // Vec::remove keeps the remaining owners in registration order
        owners.remove(pos);

        if owners.is_empty() {
            self.owners.remove(identity);
            self.statuses.remove(identity);
            let gk = identity.group_kind();
            if let Some(ids) = self.by_kind.get_mut(&gk) {
                ids.remove(identity);
                if ids.is_empty() {
                    self.by_kind.remove(&gk);
                    released.insert(gk);
                }
            }
        }

        if let Some(ids) = self.by_group.get_mut(owner) {
            ids.remove(identity);
            if ids.is_empty() {
                self.by_group.remove(owner);
            }
        }
        true
    }

    /// Panics in debug builds if the indices disagree.
    fn check_consistency(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        for (identity, owners) in &self.owners {
            assert!(!owners.is_empty(), "{identity} is registered with no owners");
            assert!(
                self.by_kind
                    .get(&identity.group_kind())
                    .is_some_and(|ids| ids.contains(identity)),
                "{identity} missing from its kind index"
            );
            for owner in owners {
                assert!(
                    self.by_group.get(owner).is_some_and(|ids| ids.contains(identity)),
                    "{identity} missing from group index of {owner}"
                );
            }
        }
        for (gk, ids) in &self.by_kind {
            assert!(!ids.is_empty(), "empty kind index entry for {gk}");
            for identity in ids {
                assert!(identity.is_kind(gk), "{identity} filed under {gk}");
                assert!(self.owners.contains_key(identity), "{identity} indexed under {gk} without owners");
            }
        }
        for (owner, ids) in &self.by_group {
            assert!(!ids.is_empty(), "empty group index entry for {owner}");
            for identity in ids {
                assert!(
                    self.owners.get(identity).is_some_and(|owners| owners.contains(owner)),
                    "{owner} lists {identity} but is not among its owners"
                );
            }
        }
        for identity in self.statuses.keys() {
            assert!(self.owners.contains_key(identity), "status cached for unowned {identity}");
        }
    }
}

/// Outcome of replacing the resource set of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDiff {
    /// Identities the group newly references, in spec order
    pub added: Vec<ResourceIdentity>,
    /// Identities the group no longer references, sorted
    pub removed: Vec<ResourceIdentity>,
    /// Kinds with no registered identity left; their watches can be stopped
    pub released_kinds: HashSet<GroupKind>,
}

impl GroupDiff {
    /// True when the call changed nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.released_kinds.is_empty()
    }
}

/// Concurrency-safe index from resources to the groups that reference them.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct ResourceMap {
    indices: RwLock<Indices>,
}

impl ResourceMap {
    /// Creates an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoned locks are recovered; check_consistency covers the indices in debug builds.
    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Owners of `identity` in registration order. Empty if unregistered.
    #[must_use]
    pub fn get(&self, identity: &ResourceIdentity) -> Vec<OwnerRef> {
        self.read().owners.get(identity).cloned().unwrap_or_default()
    }

    /// Identities currently registered under `gk`
    #[must_use]
    pub fn resources_of_kind(&self, gk: &GroupKind) -> HashSet<ResourceIdentity> {
        self.read().by_kind.get(gk).cloned().unwrap_or_default()
    }

    /// Kinds with at least one registered identity
    #[must_use]
    pub fn watched_kinds(&self) -> HashSet<GroupKind> {
        self.read().by_kind.keys().cloned().collect()
    }

    /// Identities referenced by `owner`, sorted
    #[must_use]
    pub fn resources_of_group(&self, owner: &OwnerRef) -> Vec<ResourceIdentity> {
        let mut ids: Vec<_> = self
            .read()
            .by_group
            .get(owner)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Whether `owner` references at least one identity
    #[must_use]
    pub fn has_group(&self, owner: &OwnerRef) -> bool {
        self.read().by_group.contains_key(owner)
    }

    /// Groups referencing at least one identity, sorted
    #[must_use]
    pub fn groups(&self) -> Vec<OwnerRef> {
        let mut owners: Vec<_> = self.read().by_group.keys().cloned().collect();
        owners.sort();
        owners
    }

    /// Number of groups referencing at least one identity
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.read().by_group.len()
    }

    /// True when no identity is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().owners.is_empty()
    }

    /// Cached status of `identity`, if one was set while it was registered
    #[must_use]
    pub fn get_status(&self, identity: &ResourceIdentity) -> Option<CachedStatus> {
        self.read().statuses.get(identity).cloned()
    }

    /// Stores the status of `identity`.
    ///
    /// A no-op when `identity` has no owners, which happens when a group drops
    /// a resource while its status is being computed.
    pub fn set_status(&self, identity: &ResourceIdentity, status: CachedStatus) {
        let mut indices = self.write();
        if !indices.owners.contains_key(identity) {
            debug!(resource = %identity, "Ignoring status for unregistered resource");
            return;
        }
        indices.statuses.insert(identity.clone(), status);
        indices.check_consistency();
    }

    /// Adds the edge `owner → identity`. Returns false if it already existed.
    pub fn register(&self, owner: OwnerRef, identity: ResourceIdentity) -> bool {
        let mut indices = self.write();
        let added = indices.insert(&owner, &identity);
        indices.check_consistency();
        if added {
            debug!(group = %owner, resource = %identity, "Registered resource");
        }
        added
    }

    /// Removes the edge `owner → identity`. Returns false if it did not exist.
    pub fn deregister(&self, owner: &OwnerRef, identity: &ResourceIdentity) -> bool {
        let mut indices = self.write();
        let mut released = HashSet::new();
        let removed = indices.remove(owner, identity, &mut released);
        indices.check_consistency();
        if removed {
            debug!(group = %owner, resource = %identity, "Deregistered resource");
        }
        removed
    }

    /// Replaces the set of identities `owner` references with `resources`.
    ///
    /// Applied atomically: readers see either the old or the new set.
    /// Duplicates in `resources` are ignored.
    pub fn reconcile_group(&self, owner: &OwnerRef, resources: &[ResourceIdentity]) -> GroupDiff {
        let desired: HashSet<&ResourceIdentity> = resources.iter().collect();
        let mut diff = GroupDiff::default();

        let mut indices = self.write();
        let stale: Vec<ResourceIdentity> = indices
            .by_group
            .get(owner)
            .map(|ids| ids.iter().filter(|id| !desired.contains(id)).cloned().collect())
            .unwrap_or_default();

        for identity in stale {
            if indices.remove(owner, &identity, &mut diff.released_kinds) {
                diff.removed.push(identity);
            }
        }
        for identity in resources {
            if indices.insert(owner, identity) {
                diff.added.push(identity.clone());
            }
        }

        // A kind emptied by a removal may have been refilled by an insert
        diff.released_kinds.retain(|gk| !indices.by_kind.contains_key(gk));
        indices.check_consistency();
        drop(indices);

        diff.removed.sort();
        if !diff.is_empty() {
            debug!(
                group = %owner,
                added = diff.added.len(),
                removed = diff.removed.len(),
                released_kinds = diff.released_kinds.len(),
                "Reconciled group resources"
            );
        }
        diff
    }

    /// Drops every edge of `owner` and forgets the group.
    pub fn remove_group(&self, owner: &OwnerRef) -> GroupDiff {
        let mut diff = GroupDiff::default();

        let mut indices = self.write();
        let ids: Vec<ResourceIdentity> = indices
            .by_group
            .get(owner)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        for identity in ids {
            if indices.remove(owner, &identity, &mut diff.released_kinds) {
                diff.removed.push(identity);
            }
        }
        indices.by_group.remove(owner);
        indices.check_consistency();
        drop(indices);

        diff.removed.sort();
        debug!(group = %owner, removed = diff.removed.len(), "Removed group");
        diff
    }
}

impl ResourceMapping for ResourceMap {
    fn get(&self, identity: &ResourceIdentity) -> Vec<OwnerRef> {
        ResourceMap::get(self, identity)
    }

    fn resources_of_kind(&self, gk: &GroupKind) -> HashSet<ResourceIdentity> {
        ResourceMap::resources_of_kind(self, gk)
    }

    fn set_status(&self, identity: &ResourceIdentity, status: CachedStatus) {
        ResourceMap::set_status(self, identity, status);
    }
}
