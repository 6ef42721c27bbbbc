//! Status reconciler.
//!
//! The only consumer of the event queue. For each `GroupEvent` it reads the
//! group, derives a `ResourceState` for every resource in its spec from the
//! watch stores, caches it in the `ResourceMap` and patches the group's status
//! subresource when anything changed.

#[cfg(test)]
#[path = "status_test.rs"]
mod status_test;

use crate::error::ControllerError;
use crate::handler::GroupEvent;
use crate::watch::{Lookup, WatchRegistry};
use chrono::Utc;
use crds::{ResourceGroup, ResourceGroupStatus, ResourceState, ResourceStatus};
use kube::api::{Patch, PatchParams};
use kube::core::DynamicObject;
use kube::{Api, Client};
use resource_map::{CachedStatus, ResourceMap};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Conditions that gate readiness, in order of precedence
const READINESS_CONDITIONS: [&str; 2] = ["Ready", "Available"];

/// Status of a single watched object.
pub fn compute_status(obj: &DynamicObject) -> CachedStatus {
    if obj.metadata.deletion_timestamp.is_some() {
        return CachedStatus::new(ResourceState::Terminating)
            .with_message("Resource is being deleted");
    }

    let status = obj.data.get("status");

    if let Some(generation) = obj.metadata.generation {
        let observed = status
            .and_then(|s| s.get("observedGeneration"))
            .and_then(Value::as_i64);
        if let Some(observed) = observed.filter(|observed| *observed < generation) {
            return CachedStatus::new(ResourceState::InProgress).with_message(format!(
                "Observed generation {observed} is behind generation {generation}"
            ));
        }
    }

    let conditions = status
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for wanted in READINESS_CONDITIONS {
        let Some(condition) = conditions
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some(wanted))
        else {
            continue;
        };
        if condition.get("status").and_then(Value::as_str) != Some("False") {
            continue;
        }

        let reason = condition.get("reason").and_then(Value::as_str);
        let state = if reason == Some("Failed") {
            ResourceState::Failed
        } else {
            ResourceState::InProgress
        };
        let message = condition
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{wanted} condition is False"));
        return CachedStatus::new(state).with_message(message);
    }

    CachedStatus::new(ResourceState::Current)
}

/// Status of a resource given what its watch knows about it.
pub fn status_of(lookup: &Lookup) -> CachedStatus {
    match lookup {
        Lookup::Found(obj) => compute_status(obj),
        Lookup::Missing => CachedStatus::new(ResourceState::NotFound),
        Lookup::NotWatched => CachedStatus::new(ResourceState::Unknown),
    }
}

/// Whether `next` differs from `current` in anything but the timestamp
pub(crate) fn status_changed(current: Option<&ResourceGroupStatus>, next: &ResourceGroupStatus) -> bool {
    current.is_none_or(|current| {
        current.observed_generation != next.observed_generation
            || current.resource_statuses != next.resource_statuses
    })
}

/// Drains the event queue and writes group status.
pub struct StatusReconciler {
    client: Client,
    map: Arc<ResourceMap>,
    watches: Arc<dyn WatchRegistry>,
}

impl StatusReconciler {
    /// Creates a new status reconciler.
    pub fn new(client: Client, map: Arc<ResourceMap>, watches: Arc<dyn WatchRegistry>) -> Self {
        Self {
            client,
            map,
            watches,
        }
    }

    /// Processes events until every sender is dropped.
    pub async fn run(&self, mut queue: mpsc::Receiver<GroupEvent>) {
        info!("Status reconciler started");
        while let Some(event) = queue.recv().await {
            if let Err(e) = self.reconcile(&event).await {
                warn!(
                    group = %event.owner,
                    trigger = ?event.trigger.as_ref().map(ToString::to_string),
                    error = %e,
                    "Failed to update ResourceGroup status"
                );
            }
        }
        info!("Event queue closed; status reconciler stopped");
    }

    /// Recomputes and, if changed, patches the status of one group.
    pub async fn reconcile(&self, event: &GroupEvent) -> Result<(), ControllerError> {
        let owner = &event.owner;
        let api: Api<ResourceGroup> = Api::namespaced(self.client.clone(), &owner.namespace);

        let Some(rg) = api.get_opt(&owner.name).await? else {
            debug!(group = %owner, "ResourceGroup no longer exists");
            return Ok(());
        };
        if rg.metadata.deletion_timestamp.is_some() {
            debug!(group = %owner, "ResourceGroup is terminating; skipping status");
            return Ok(());
        }

        let next = self.group_status(&rg);
        if !status_changed(rg.status.as_ref(), &next) {
            debug!(group = %owner, "ResourceGroup status unchanged");
            return Ok(());
        }

        let patch = serde_json::json!({ "status": next });
        api.patch_status(&owner.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(
            group = %owner,
            resources = next.resource_statuses.len(),
            observed_generation = next.observed_generation,
            "Updated ResourceGroup status"
        );
        Ok(())
    }

    /// Status of every resource of `rg` in spec order, cached in the map.
    pub fn group_status(&self, rg: &ResourceGroup) -> ResourceGroupStatus {
        let resource_statuses = rg
            .spec
            .resources
            .iter()
            .map(|identity| {
                let cached = status_of(&self.watches.lookup(identity));
                self.map.set_status(identity, cached.clone());
                ResourceStatus::new(identity, cached.status, cached.message)
            })
            .collect();

        ResourceGroupStatus {
            observed_generation: rg.metadata.generation.unwrap_or_default(),
            resource_statuses,
            last_reconciled: Some(Utc::now()),
        }
    }
}
