//! Dynamic watches of referenced kinds.
//!
//! The `WatchManager` runs one task per `GroupKind` referenced by any
//! ResourceGroup. A task first resolves the kind to an `ApiResource` through
//! API discovery, retrying with Fibonacci backoff while the kind is not served
//! (its CRD may be applied after the group). It then lists and watches the kind
//! across all namespaces, mirrors the objects into a reflector store and feeds
//! every change to an `EventHandler`.
//!
//! The store is applied before the handler runs, so a reconciler woken by the
//! event reads the state that produced it. Once the first list completes, the
//! owners of referenced objects it did not contain are enqueued as well.

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::handler::{EventHandler, GroupEvent};
use crds::{GroupKind, ResourceIdentity};
use futures::StreamExt;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::Discovery;
use kube::{Api, Client};
use kube_runtime::reflector::{ObjectRef, Store, store::Writer};
use kube_runtime::watcher::Event;
use kube_runtime::{WatchStreamExt, watcher};
use resource_map::ResourceMapping;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of looking up a referenced resource in the watch stores.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// The object as last seen by the watch
    Found(Arc<DynamicObject>),
    /// The kind is watched and synced, but the object does not exist
    Missing,
    /// The kind is not watched, or its watch has not resolved and synced yet
    NotWatched,
}

/// Watch bookkeeping used by the reconcilers.
pub trait WatchRegistry: Send + Sync {
    /// Starts watching `gk` unless already watched. Returns true if a watch was started.
    fn ensure(&self, gk: &GroupKind) -> bool;

    /// Stops watching `gk` if no resource of that kind is registered any more.
    /// Returns true if a watch was stopped.
    fn release(&self, gk: &GroupKind) -> bool;

    /// Whether a watch task exists for `gk`
    fn is_watching(&self, gk: &GroupKind) -> bool;

    /// Current state of `identity` in its kind's store
    fn lookup(&self, identity: &ResourceIdentity) -> Lookup;
}

#[derive(Default)]
struct WatchState {
    resolved: OnceLock<(ApiResource, Store<DynamicObject>)>,
    synced: AtomicBool,
}

struct ActiveWatch {
    task: JoinHandle<()>,
    state: Arc<WatchState>,
}

struct Watches {
    /// Template for new watch tasks; `None` after shutdown
    handler: Option<EventHandler>,
    active: HashMap<GroupKind, ActiveWatch>,
}

/// Owns the per-kind watch tasks.
pub struct WatchManager {
    client: Client,
    mapping: Arc<dyn ResourceMapping>,
    backoff_min_secs: u64,
    backoff_max_secs: u64,
    watches: Mutex<Watches>,
}

impl WatchManager {
    /// Creates a manager whose handlers route through `mapping` into `queue`.
    pub fn new(
        client: Client,
        mapping: Arc<dyn ResourceMapping>,
        queue: mpsc::Sender<GroupEvent>,
        config: &ControllerConfig,
    ) -> Self {
        let handler = EventHandler::new(mapping.clone(), queue)
            .with_enqueue_timeout(config.enqueue_timeout);
        Self {
            client,
            mapping,
            backoff_min_secs: config.backoff_min_secs,
            backoff_max_secs: config.backoff_max_secs,
            watches: Mutex::new(Watches {
                handler: Some(handler),
                active: HashMap::new(),
            }),
        }
    }

    /// Kinds with a running watch task, sorted
    pub fn watched_kinds(&self) -> Vec<GroupKind> {
        let mut kinds: Vec<_> = self.watches().active.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Aborts every watch task and drops the manager's queue sender.
    ///
    /// Later calls to `ensure` start nothing.
    pub fn shutdown(&self) {
        let mut watches = self.watches();
        watches.handler = None;
        for (gk, watch) in watches.active.drain() {
            debug!(kind = %gk, "Aborting watch");
            watch.task.abort();
        }
        info!("All resource watches stopped");
    }

    fn watches(&self) -> MutexGuard<'_, Watches> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WatchRegistry for WatchManager {
    fn ensure(&self, gk: &GroupKind) -> bool {
        let mut watches = self.watches();
        if watches.active.contains_key(gk) {
            return false;
        }
        let Some(handler) = watches.handler.clone() else {
            debug!(kind = %gk, "Watch manager is shut down; not watching");
            return false;
        };

        let state = Arc::new(WatchState::default());
        let task = tokio::spawn(run_watch(
            self.client.clone(),
            gk.clone(),
            handler,
            self.mapping.clone(),
            state.clone(),
            FibonacciBackoff::new(self.backoff_min_secs, self.backoff_max_secs),
        ));
        info!(kind = %gk, "Started resource watch");
        watches.active.insert(gk.clone(), ActiveWatch { task, state });
        true
    }

    fn release(&self, gk: &GroupKind) -> bool {
        let mut watches = self.watches();
        let remaining = self.mapping.resources_of_kind(gk).len();
        if remaining > 0 {
            debug!(kind = %gk, remaining, "Kind still referenced; keeping watch");
            return false;
        }
        match watches.active.remove(gk) {
            Some(watch) => {
                watch.task.abort();
                info!(kind = %gk, "Stopped resource watch");
                true
            }
            None => false,
        }
    }

    fn is_watching(&self, gk: &GroupKind) -> bool {
        self.watches().active.contains_key(gk)
    }

    fn lookup(&self, identity: &ResourceIdentity) -> Lookup {
        let state = match self.watches().active.get(&identity.group_kind()) {
            Some(watch) => watch.state.clone(),
            None => return Lookup::NotWatched,
        };
        let Some((ar, store)) = state.resolved.get() else {
            return Lookup::NotWatched;
        };
        if !state.synced.load(Ordering::Acquire) {
            return Lookup::NotWatched;
        }

        match store.get(&object_ref(identity, ar)) {
            Some(obj) => Lookup::Found(obj),
            None => Lookup::Missing,
        }
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        for watch in self.watches().active.values() {
            watch.task.abort();
        }
    }
}

/// Resolves `gk` to the API server's preferred version of the kind.
async fn resolve_kind(client: &Client, gk: &GroupKind) -> Result<ApiResource, ControllerError> {
    let discovery = Discovery::new(client.clone())
        .filter(&[gk.group.as_str()])
        .run()
        .await?;
    discovery
        .get(&gk.group)
        .and_then(|group| group.recommended_kind(&gk.kind))
        .map(|(ar, _caps)| ar)
        .ok_or_else(|| ControllerError::Discovery(format!("{gk} is not served by the API server")))
}

async fn run_watch(
    client: Client,
    gk: GroupKind,
    handler: EventHandler,
    mapping: Arc<dyn ResourceMapping>,
    state: Arc<WatchState>,
    mut backoff: FibonacciBackoff,
) {
    let ar = loop {
        match resolve_kind(&client, &gk).await {
            Ok(ar) => break ar,
            Err(e) => {
                let delay = backoff.next_backoff();
                warn!(kind = %gk, error = %e, retry_in = ?delay, "Cannot resolve kind; retrying");
                tokio::time::sleep(delay).await;
            }
        }
    };
    info!(kind = %gk, version = %ar.version, plural = %ar.plural, "Resolved kind");

    let api: Api<DynamicObject> = Api::all_with(client, &ar);
    let handler = handler.with_gvk(GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind));
    let mut kind_watch = KindWatch::new(gk, ar, handler, mapping, state);

    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => kind_watch.handle(&event).await,
            Err(e) => warn!(kind = %kind_watch.gk, error = %e, "Watch stream error"),
        }
    }
    warn!(kind = %kind_watch.gk, "Watch stream ended");
}

fn object_ref(identity: &ResourceIdentity, ar: &ApiResource) -> ObjectRef<DynamicObject> {
    let key = ObjectRef::new_with(&identity.name, ar.clone());
    if identity.namespace.is_empty() {
        key
    } else {
        key.within(&identity.namespace)
    }
}

/// A store change, as reported to the handler.
#[derive(Debug)]
enum Change {
    Added(DynamicObject),
    Updated {
        old: Arc<DynamicObject>,
        new: DynamicObject,
    },
    Deleted(DynamicObject),
    /// Referenced, but absent from the first complete list
    Missing(ResourceIdentity),
}

/// Store of one resolved kind and the list in progress.
struct KindWatch {
    gk: GroupKind,
    ar: ApiResource,
    writer: Writer<DynamicObject>,
    reader: Store<DynamicObject>,
    handler: EventHandler,
    mapping: Arc<dyn ResourceMapping>,
    state: Arc<WatchState>,
    relisted: Vec<DynamicObject>,
}

impl KindWatch {
    fn new(
        gk: GroupKind,
        ar: ApiResource,
        handler: EventHandler,
        mapping: Arc<dyn ResourceMapping>,
        state: Arc<WatchState>,
    ) -> Self {
        let writer = Writer::new(ar.clone());
        let reader = writer.as_reader();
        // Only the kind's own task sets it, once per WatchState
        let _ = state.resolved.set((ar.clone(), reader.clone()));
        Self {
            gk,
            ar,
            writer,
            reader,
            handler,
            mapping,
            state,
            relisted: Vec::new(),
        }
    }

    /// Applies `event` to the store, then reports the resulting changes.
    async fn handle(&mut self, event: &Event<DynamicObject>) {
        for change in self.apply(event) {
            match change {
                Change::Added(obj) => self.handler.on_add(&obj).await,
                Change::Updated { old, new } => self.handler.on_update(old.as_ref(), &new).await,
                Change::Deleted(obj) => self.handler.on_delete(&obj).await,
                Change::Missing(identity) => self.handler.on_missing(&identity).await,
            };
        }
    }

    fn apply(&mut self, event: &Event<DynamicObject>) -> Vec<Change> {
        match event {
            Event::Apply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj_with(obj, self.ar.clone()));
                self.writer.apply_watcher_event(event);
                let change = match old {
                    Some(old) => Change::Updated {
                        old,
                        new: obj.clone(),
                    },
                    None => Change::Added(obj.clone()),
                };
                vec![change]
            }
            Event::Delete(obj) => {
                self.writer.apply_watcher_event(event);
                vec![Change::Deleted(obj.clone())]
            }
            Event::Init => {
                debug!(kind = %self.gk, "Listing objects");
                self.relisted.clear();
                self.writer.apply_watcher_event(event);
                Vec::new()
            }
            Event::InitApply(obj) => {
                self.relisted.push(obj.clone());
                self.writer.apply_watcher_event(event);
                Vec::new()
            }
            Event::InitDone => self.complete_list(event),
        }
    }

    /// Swaps the listed objects into the store and diffs them against the
    /// previous contents.
    fn complete_list(&mut self, event: &Event<DynamicObject>) -> Vec<Change> {
        let mut before: HashMap<ObjectRef<DynamicObject>, Arc<DynamicObject>> = self
            .reader
            .state()
            .into_iter()
            .map(|obj| (ObjectRef::from_obj_with(obj.as_ref(), self.ar.clone()), obj))
            .collect();
        self.writer.apply_watcher_event(event);
        let first_sync = !self.state.synced.swap(true, Ordering::AcqRel);

        let relisted = std::mem::take(&mut self.relisted);
        debug!(kind = %self.gk, objects = relisted.len(), first_sync, "List complete");

        let mut changes = Vec::with_capacity(relisted.len() + before.len());
        for obj in relisted {
            let change = match before.remove(&ObjectRef::from_obj_with(&obj, self.ar.clone())) {
                Some(old) => Change::Updated { old, new: obj },
                None => Change::Added(obj),
            };
            changes.push(change);
        }
        // Deleted while the watch was down
        changes.extend(before.into_values().map(|gone| Change::Deleted(Arc::unwrap_or_clone(gone))));

        // Until now lookups of this kind answered NotWatched
        if first_sync {
            let mut missing: Vec<_> = self
                .mapping
                .resources_of_kind(&self.gk)
                .into_iter()
                .filter(|identity| self.reader.get(&object_ref(identity, &self.ar)).is_none())
                .collect();
            missing.sort();
            changes.extend(missing.into_iter().map(Change::Missing));
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{dynamic_object, test_client};
    use resource_map::{OwnerRef, ResourceMap};

    fn manager(map: Arc<ResourceMap>) -> (WatchManager, mpsc::Receiver<GroupEvent>) {
        let (tx, rx) = mpsc::channel(1);
        let manager = WatchManager::new(test_client(), map, tx, &ControllerConfig::default());
        (manager, rx)
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (manager, _rx) = manager(Arc::new(ResourceMap::new()));
        let gk = GroupKind::new("apps", "Deployment");

        assert!(manager.ensure(&gk), "First ensure should start a watch");
        assert!(!manager.ensure(&gk), "Second ensure should be a no-op");
        assert!(manager.is_watching(&gk));
        assert_eq!(manager.watched_kinds(), vec![gk]);
    }

    #[tokio::test]
    async fn test_release_keeps_referenced_kind() {
        let map = Arc::new(ResourceMap::new());
        let gk = GroupKind::new("", "ConfigMap");
        map.register(
            OwnerRef::new("ns", "group"),
            ResourceIdentity::new("", "ConfigMap", "ns", "cm"),
        );
        let (manager, _rx) = manager(map.clone());

        manager.ensure(&gk);
        assert!(!manager.release(&gk), "Referenced kind should stay watched");
        assert!(manager.is_watching(&gk));

        map.remove_group(&OwnerRef::new("ns", "group"));
        assert!(manager.release(&gk), "Unreferenced kind should be released");
        assert!(!manager.is_watching(&gk));
        assert!(!manager.release(&gk), "Releasing twice is a no-op");
    }

    #[tokio::test]
    async fn test_lookup_before_sync_is_not_watched() {
        let (manager, _rx) = manager(Arc::new(ResourceMap::new()));
        let id = ResourceIdentity::new("apps", "Deployment", "ns", "web");

        assert!(matches!(manager.lookup(&id), Lookup::NotWatched));

        // The API server is unreachable, so the kind never resolves
        manager.ensure(&id.group_kind());
        assert!(matches!(manager.lookup(&id), Lookup::NotWatched));
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_watches() {
        let (manager, _rx) = manager(Arc::new(ResourceMap::new()));
        manager.ensure(&GroupKind::new("apps", "Deployment"));
        manager.ensure(&GroupKind::new("", "Service"));
        assert_eq!(manager.watched_kinds().len(), 2);

        manager.shutdown();
        assert!(manager.watched_kinds().is_empty());
        assert!(!manager.ensure(&GroupKind::new("apps", "Deployment")), "No watches after shutdown");
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue() {
        let (manager, mut rx) = manager(Arc::new(ResourceMap::new()));
        manager.ensure(&GroupKind::new("apps", "Deployment"));
        manager.shutdown();

        let closed = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("queue should close once watch tasks are gone");
        assert!(closed.is_none());
    }

    fn deployment(name: &str, generation: i64) -> DynamicObject {
        let mut obj = dynamic_object("apps", "v1", "Deployment", Some("prod"), name);
        obj.metadata.generation = Some(generation);
        obj
    }

    fn kind_watch(map: Arc<ResourceMap>) -> (KindWatch, mpsc::Receiver<GroupEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let gvk = GroupVersionKind::gvk("apps", "v1", "Deployment");
        let handler = EventHandler::new(map.clone(), tx).with_gvk(gvk.clone());
        let kind_watch = KindWatch::new(
            GroupKind::new("apps", "Deployment"),
            ApiResource::from_gvk(&gvk),
            handler,
            map,
            Arc::new(WatchState::default()),
        );
        (kind_watch, rx)
    }

    fn names(changes: &[Change]) -> Vec<(&'static str, String)> {
        let name = |obj: &DynamicObject| obj.metadata.name.clone().unwrap_or_default();
        changes
            .iter()
            .map(|change| match change {
                Change::Added(obj) => ("add", name(obj)),
                Change::Updated { new, .. } => ("update", name(new)),
                Change::Deleted(obj) => ("delete", name(obj)),
                Change::Missing(identity) => ("missing", identity.name.clone()),
            })
            .collect()
    }

    fn relist(kind_watch: &mut KindWatch, objects: Vec<DynamicObject>) -> Vec<Change> {
        assert!(kind_watch.apply(&Event::Init).is_empty());
        for obj in objects {
            assert!(kind_watch.apply(&Event::InitApply(obj)).is_empty(), "List items are held back");
        }
        kind_watch.apply(&Event::InitDone)
    }

    #[test]
    fn test_apply_distinguishes_add_from_update() {
        let (mut kind_watch, _rx) = kind_watch(Arc::new(ResourceMap::new()));

        let changes = kind_watch.apply(&Event::Apply(deployment("web", 1)));
        assert_eq!(names(&changes), vec![("add", "web".to_string())]);

        let changes = kind_watch.apply(&Event::Apply(deployment("web", 2)));
        assert_eq!(names(&changes), vec![("update", "web".to_string())]);
        match &changes[0] {
            Change::Updated { old, new } => {
                assert_eq!(old.metadata.generation, Some(1), "Old object comes from the store");
                assert_eq!(new.metadata.generation, Some(2));
            }
            other => panic!("Expected an update, got {other:?}"),
        }

        let changes = kind_watch.apply(&Event::Delete(deployment("web", 2)));
        assert_eq!(names(&changes), vec![("delete", "web".to_string())]);
        assert!(kind_watch.reader.state().is_empty());
    }

    #[test]
    fn test_relist_reports_objects_deleted_while_down() {
        let (mut kind_watch, _rx) = kind_watch(Arc::new(ResourceMap::new()));

        let changes = relist(&mut kind_watch, vec![deployment("web", 1), deployment("api", 1)]);
        assert_eq!(
            names(&changes),
            vec![("add", "web".to_string()), ("add", "api".to_string())]
        );

        let changes = relist(&mut kind_watch, vec![deployment("web", 2)]);
        assert_eq!(
            names(&changes),
            vec![("update", "web".to_string()), ("delete", "api".to_string())]
        );
        assert_eq!(kind_watch.reader.state().len(), 1);
    }

    #[test]
    fn test_first_list_reports_missing_referenced_objects() {
        let map = Arc::new(ResourceMap::new());
        map.reconcile_group(
            &OwnerRef::new("default", "inventory"),
            &[
                ResourceIdentity::new("apps", "Deployment", "prod", "web"),
                ResourceIdentity::new("apps", "Deployment", "prod", "missing"),
                ResourceIdentity::new("", "ConfigMap", "prod", "cfg"),
            ],
        );
        let (mut kind_watch, _rx) = kind_watch(map);

        let changes = relist(&mut kind_watch, vec![deployment("web", 1)]);
        assert_eq!(
            names(&changes),
            vec![("add", "web".to_string()), ("missing", "missing".to_string())],
            "Only absent objects of the watched kind are reported"
        );
        assert!(kind_watch.state.synced.load(Ordering::Acquire));

        // Later lists see lookups answer Missing already
        let changes = relist(&mut kind_watch, vec![deployment("web", 1)]);
        assert_eq!(names(&changes), vec![("update", "web".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_object_requeues_owner_after_sync() {
        let map = Arc::new(ResourceMap::new());
        let owner = OwnerRef::new("default", "inventory");
        let missing = ResourceIdentity::new("apps", "Deployment", "prod", "missing");
        map.reconcile_group(&owner, std::slice::from_ref(&missing));
        let (mut kind_watch, mut rx) = kind_watch(map);

        kind_watch.handle(&Event::Init).await;
        assert!(rx.try_recv().is_err(), "Nothing is reported before the list completes");

        kind_watch.handle(&Event::InitDone).await;
        assert_eq!(rx.try_recv().ok(), Some(GroupEvent::triggered_by(owner, missing)));
        assert!(rx.try_recv().is_err());
    }
}
