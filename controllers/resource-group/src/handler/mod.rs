//! Watch event fan-out.
//!
//! An `EventHandler` is attached to the watch of one resource type. For every
//! add, update or delete it looks up the groups that reference the changed
//! object and enqueues one `GroupEvent` per group, in owner order.
//!
//! Handlers hold no state besides the mapping, the queue sender and the
//! optional expected type, so many handlers can share one queue.

pub mod object;

pub use object::{WatchedObject, identity_of};

use crds::ResourceIdentity;
use kube::core::GroupVersionKind;
use resource_map::{OwnerRef, ResourceMapping};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Request to reconcile one ResourceGroup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEvent {
    /// The group to reconcile
    pub owner: OwnerRef,
    /// Resource whose change produced this event, if any
    pub trigger: Option<ResourceIdentity>,
}

impl GroupEvent {
    /// Event for a group whose own spec changed
    #[must_use]
    pub fn for_group(owner: OwnerRef) -> Self {
        Self { owner, trigger: None }
    }

    /// Event for a group caused by a change of `trigger`
    #[must_use]
    pub fn triggered_by(owner: OwnerRef, trigger: ResourceIdentity) -> Self {
        Self {
            owner,
            trigger: Some(trigger),
        }
    }
}

#[derive(Debug, Error)]
enum EnqueueError {
    #[error("event queue is closed")]
    Closed,

    #[error("event queue did not accept the event within {0:?}")]
    TimedOut(Duration),
}

/// Turns watch callbacks into per-group reconcile events.
#[derive(Clone)]
pub struct EventHandler {
    mapping: Arc<dyn ResourceMapping>,
    queue: mpsc::Sender<GroupEvent>,
    gvk: Option<GroupVersionKind>,
    enqueue_timeout: Option<Duration>,
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("gvk", &self.gvk)
            .field("enqueue_timeout", &self.enqueue_timeout)
            .field("queue_closed", &self.queue.is_closed())
            .finish_non_exhaustive()
    }
}

impl EventHandler {
    /// Creates a handler routing through `mapping` into `queue`.
    pub fn new(mapping: Arc<dyn ResourceMapping>, queue: mpsc::Sender<GroupEvent>) -> Self {
        Self {
            mapping,
            queue,
            gvk: None,
            enqueue_timeout: None,
        }
    }

    /// Sets the type this handler's watch delivers.
    ///
    /// Objects of another type are still routed by their own identity; the
    /// mismatch is only logged. Objects without type fields take theirs from
    /// `gvk`.
    #[must_use]
    pub fn with_gvk(mut self, gvk: GroupVersionKind) -> Self {
        self.gvk = Some(gvk);
        self
    }

    /// Bounds how long a single enqueue may block. `None` waits until the
    /// consumer accepts the event or the queue closes.
    #[must_use]
    pub fn with_enqueue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Object created. Returns the number of events enqueued.
    pub async fn on_add<O>(&self, obj: &O) -> usize
    where
        O: WatchedObject + ?Sized,
    {
        self.dispatch("add", obj).await
    }

    /// Object changed. Routed by the new object.
    pub async fn on_update<O>(&self, _old: &O, new: &O) -> usize
    where
        O: WatchedObject + ?Sized,
    {
        self.dispatch("update", new).await
    }

    /// Object deleted.
    pub async fn on_delete<O>(&self, obj: &O) -> usize
    where
        O: WatchedObject + ?Sized,
    {
        self.dispatch("delete", obj).await
    }

    /// A referenced object the watch found absent when its list completed.
    /// Routed by `identity`.
    pub async fn on_missing(&self, identity: &ResourceIdentity) -> usize {
        self.route("missing", identity).await
    }

    async fn dispatch<O>(&self, action: &'static str, obj: &O) -> usize
    where
        O: WatchedObject + ?Sized,
    {
        let identity = match identity_of(obj, self.gvk.as_ref()) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    action,
                    error = %e,
                    expected = ?self.gvk,
                    name = ?obj.name(),
                    namespace = ?obj.namespace(),
                    "Dropping malformed watch event"
                );
                return 0;
            }
        };
        self.check_type(&identity);
        self.route(action, &identity).await
    }

    async fn route(&self, action: &'static str, identity: &ResourceIdentity) -> usize {
        let owners = self.mapping.get(identity);
        if owners.is_empty() {
            debug!(action, resource = %identity, "No group references resource");
            return 0;
        }

        let mut sent = 0;
        for owner in owners {
            let event = GroupEvent::triggered_by(owner, identity.clone());
            let group = event.owner.clone();
            match self.enqueue(event).await {
                Ok(()) => {
                    debug!(action, resource = %identity, %group, "Enqueued group event");
                    sent += 1;
                }
                Err(EnqueueError::Closed) => {
                    debug!(action, resource = %identity, "Event queue closed; stopping fan-out");
                    break;
                }
                Err(e @ EnqueueError::TimedOut(_)) => {
                    warn!(action, resource = %identity, %group, error = %e, "Dropped group event");
                }
            }
        }
        sent
    }

    fn check_type(&self, identity: &ResourceIdentity) {
        let Some(gvk) = &self.gvk else {
            return;
        };
        if identity.group != gvk.group || identity.kind != gvk.kind {
            warn!(
                resource = %identity,
                expected_group = %gvk.group,
                expected_kind = %gvk.kind,
                "Watched object does not match the handler's type; routing by object identity"
            );
        }
    }

    async fn enqueue(&self, event: GroupEvent) -> Result<(), EnqueueError> {
        let send = self.queue.send(event);
        match self.enqueue_timeout {
            None => send.await.map_err(|_closed| EnqueueError::Closed),
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(sent) => sent.map_err(|_closed| EnqueueError::Closed),
                Err(_elapsed) => Err(EnqueueError::TimedOut(limit)),
            },
        }
    }
}
