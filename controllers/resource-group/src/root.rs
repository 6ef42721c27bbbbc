//! ResourceGroup watcher.
//!
//! Keeps the `ResourceMap` in line with the spec of every ResourceGroup and
//! makes sure each referenced kind is watched. After a group's spec has been
//! applied, the group itself is enqueued for a status pass. Every completed
//! relist drops the groups it no longer contains.

use crate::error::ControllerError;
use crate::handler::GroupEvent;
use crate::watch::WatchRegistry;
use crds::ResourceGroup;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{WatchStreamExt, watcher};
use resource_map::{GroupDiff, OwnerRef, ResourceMap, extract_group_kinds};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Applies ResourceGroup specs to the resource map and the watches.
pub struct RootReconciler {
    api: Api<ResourceGroup>,
    map: Arc<ResourceMap>,
    watches: Arc<dyn WatchRegistry>,
    queue: mpsc::Sender<GroupEvent>,
}

/// The map key of a ResourceGroup
pub fn owner_of(rg: &ResourceGroup) -> Result<OwnerRef, ControllerError> {
    let name = rg.metadata.name.as_deref().filter(|n| !n.is_empty()).ok_or_else(|| {
        ControllerError::Reconciliation("ResourceGroup has no metadata.name".to_string())
    })?;
    Ok(OwnerRef::new(rg.namespace().unwrap_or_default(), name))
}

impl RootReconciler {
    /// Creates a new root reconciler.
    pub fn new(
        api: Api<ResourceGroup>,
        map: Arc<ResourceMap>,
        watches: Arc<dyn WatchRegistry>,
        queue: mpsc::Sender<GroupEvent>,
    ) -> Self {
        Self {
            api,
            map,
            watches,
            queue,
        }
    }

    /// Watches ResourceGroups until the stream ends.
    ///
    /// Stream errors are logged and retried with the watcher's default backoff.
    pub async fn watch(&self) -> Result<(), ControllerError> {
        info!("Starting ResourceGroup watcher");

        let mut stream = watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut listed = HashSet::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => self.handle_event(event, &mut listed).await,
                Err(e) => warn!("ResourceGroup watcher stream error: {}", e),
            }
        }

        warn!("ResourceGroup watcher stream ended");
        Ok(())
    }

    /// Applies one watcher event. `listed` collects the groups of the list in
    /// progress; groups missing from a completed list are removed.
    async fn handle_event(
        &self,
        event: watcher::Event<ResourceGroup>,
        listed: &mut HashSet<OwnerRef>,
    ) {
        match event {
            watcher::Event::Apply(rg) => {
                let name = rg.name_any();
                debug!("ResourceGroup applied: {}", name);
                if let Err(e) = self.apply_group(&rg).await {
                    error!("Failed to reconcile ResourceGroup {}: {}", name, e);
                }
            }
            watcher::Event::Delete(rg) => {
                let name = rg.name_any();
                info!("ResourceGroup deleted: {}", name);
                match owner_of(&rg) {
                    Ok(owner) => {
                        self.delete_group(&owner);
                    }
                    Err(e) => warn!("Ignoring deleted ResourceGroup {}: {}", name, e),
                }
            }
            watcher::Event::Init => {
                debug!("Listing ResourceGroups");
                listed.clear();
            }
            watcher::Event::InitApply(rg) => {
                let name = rg.name_any();
                debug!("ResourceGroup init apply: {}", name);
                if let Ok(owner) = owner_of(&rg) {
                    listed.insert(owner);
                }
                if let Err(e) = self.apply_group(&rg).await {
                    warn!("Failed to reconcile ResourceGroup {}: {}", name, e);
                }
            }
            watcher::Event::InitDone => {
                let mut pruned = 0;
                for owner in self.map.groups() {
                    if !listed.contains(&owner) {
                        info!(group = %owner, "ResourceGroup no longer listed; removing");
                        self.delete_group(&owner);
                        pruned += 1;
                    }
                }
                listed.clear();
                info!(
                    groups = self.map.group_count(),
                    pruned,
                    "ResourceGroup watcher initialization complete"
                );
            }
        }
    }

    /// Registers the group's resources, starts watches for their kinds and
    /// enqueues the group.
    ///
    /// A group being deleted is removed from the map instead.
    pub async fn apply_group(&self, rg: &ResourceGroup) -> Result<GroupDiff, ControllerError> {
        let owner = owner_of(rg)?;
        if rg.metadata.deletion_timestamp.is_some() {
            debug!(group = %owner, "ResourceGroup is terminating");
            return Ok(self.delete_group(&owner));
        }

        let resources = &rg.spec.resources;
        let diff = self.map.reconcile_group(&owner, resources);
        for gk in extract_group_kinds(resources) {
            self.watches.ensure(&gk);
        }
        self.release_kinds(&diff);

        if !diff.is_empty() {
            info!(
                group = %owner,
                added = diff.added.len(),
                removed = diff.removed.len(),
                released = diff.released_kinds.len(),
                "Updated group inventory"
            );
        }

        self.queue
            .send(GroupEvent::for_group(owner))
            .await
            .map_err(|_| ControllerError::Reconciliation("event queue is closed".to_string()))?;
        Ok(diff)
    }

    /// Removes every edge of `owner` and releases kinds nothing references.
    pub fn delete_group(&self, owner: &OwnerRef) -> GroupDiff {
        let diff = self.map.remove_group(owner);
        self.release_kinds(&diff);
        debug!(group = %owner, removed = diff.removed.len(), "Removed group from inventory");
        diff
    }

    fn release_kinds(&self, diff: &GroupDiff) {
        for gk in &diff.released_kinds {
            self.watches.release(gk);
        }
    }
}
