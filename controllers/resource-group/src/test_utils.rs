//! Test utilities for unit testing the handler and reconcilers
//!
//! This module provides helpers for creating test objects and a fixed-answer
//! resource mapping.

#[cfg(test)]
use crds::{GroupKind, ResourceIdentity};
#[cfg(test)]
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
#[cfg(test)]
use resource_map::{CachedStatus, OwnerRef, ResourceMapping};
#[cfg(test)]
use std::collections::HashSet;

/// Mapping with hard-wired owners
///
/// Objects of kind `MyKind` belong to `my-namespace/my-name` and
/// `namespace2/name2`; everything else to `namespace1/name1` and
/// `namespace2/name2`.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeMapping;

#[cfg(test)]
impl ResourceMapping for FakeMapping {
    fn get(&self, identity: &ResourceIdentity) -> Vec<OwnerRef> {
        if identity.kind == "MyKind" {
            return vec![
                OwnerRef::new("my-namespace", "my-name"),
                OwnerRef::new("namespace2", "name2"),
            ];
        }
        vec![
            OwnerRef::new("namespace1", "name1"),
            OwnerRef::new("namespace2", "name2"),
        ]
    }

    fn resources_of_kind(&self, _gk: &GroupKind) -> HashSet<ResourceIdentity> {
        HashSet::new()
    }

    fn set_status(&self, _identity: &ResourceIdentity, _status: CachedStatus) {}
}

/// Helper to create an unstructured JSON object
#[cfg(test)]
pub fn unstructured(
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
) -> serde_json::Value {
    let mut metadata = serde_json::json!({ "name": name });
    if let Some(ns) = namespace {
        metadata["namespace"] = serde_json::Value::String(ns.to_string());
    }
    serde_json::json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": metadata,
    })
}

/// Helper to create a `DynamicObject` with type fields set
#[cfg(test)]
pub fn dynamic_object(
    group: &str,
    version: &str,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
) -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind));
    let obj = DynamicObject::new(name, &ar);
    match namespace {
        Some(ns) => obj.within(ns),
        None => obj,
    }
}

/// Client pointing at a closed local port
///
/// Nothing connects until a request is made; requests fail fast.
#[cfg(test)]
pub fn test_client() -> kube::Client {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let uri = "http://127.0.0.1:9".parse().expect("valid uri");
    kube::Client::try_from(kube::Config::new(uri)).expect("client from static config")
}

/// Helper to create a ResourceGroup with the given resources
#[cfg(test)]
pub fn resource_group(
    namespace: &str,
    name: &str,
    resources: Vec<ResourceIdentity>,
) -> crds::ResourceGroup {
    let mut rg = crds::ResourceGroup::new(
        name,
        crds::ResourceGroupSpec {
            resources,
            descriptor: None,
        },
    );
    rg.metadata.namespace = Some(namespace.to_string());
    rg.metadata.generation = Some(1);
    rg
}

/// In-memory watch registry
///
/// `ensure` and `release` only track the kind set; `lookup` answers from
/// `objects` for watched kinds.
#[cfg(test)]
#[derive(Default)]
pub struct FakeWatches {
    watched: std::sync::Mutex<std::collections::BTreeSet<GroupKind>>,
    objects: std::sync::Mutex<std::collections::HashMap<ResourceIdentity, DynamicObject>>,
}

#[cfg(test)]
impl FakeWatches {
    /// Makes `obj` visible under `identity`
    pub fn insert(&self, identity: ResourceIdentity, obj: DynamicObject) {
        self.objects.lock().expect("objects lock").insert(identity, obj);
    }
}

#[cfg(test)]
impl crate::watch::WatchRegistry for FakeWatches {
    fn ensure(&self, gk: &GroupKind) -> bool {
        self.watched.lock().expect("watched lock").insert(gk.clone())
    }

    fn release(&self, gk: &GroupKind) -> bool {
        self.watched.lock().expect("watched lock").remove(gk)
    }

    fn is_watching(&self, gk: &GroupKind) -> bool {
        self.watched.lock().expect("watched lock").contains(gk)
    }

    fn lookup(&self, identity: &ResourceIdentity) -> crate::watch::Lookup {
        use crate::watch::Lookup;
        if !self.is_watching(&identity.group_kind()) {
            return Lookup::NotWatched;
        }
        match self.objects.lock().expect("objects lock").get(identity) {
            Some(obj) => Lookup::Found(std::sync::Arc::new(obj.clone())),
            None => Lookup::Missing,
        }
    }
}
