//! Concurrency tests for the resource map
//!
//! Many threads register, deregister and read overlapping identities at once.
//! The final state must match a serial execution of the same calls.

use crds::{GroupKind, ResourceIdentity};
use resource_map::{CachedStatus, OwnerRef, ResourceMap};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

const GROUPS: usize = 8;
const RESOURCES: usize = 32;

fn resource(i: usize) -> ResourceIdentity {
    // Two kinds so the type index is exercised too
    if i % 2 == 0 {
        ResourceIdentity::new("", "ConfigMap", "ns", format!("cm-{i}"))
    } else {
        ResourceIdentity::new("apps", "Deployment", "ns", format!("deploy-{i}"))
    }
}

fn group(g: usize) -> OwnerRef {
    OwnerRef::new(format!("ns-{g}"), format!("group-{g}"))
}

#[test]
fn test_concurrent_register_deregister_matches_serial_result() {
    let map = Arc::new(ResourceMap::new());

    // Every group registers every resource twice, then deregisters the odd
    // resources. Each thread owns one group, so the serial result is fixed.
    thread::scope(|s| {
        for g in 0..GROUPS {
            let map = Arc::clone(&map);
            s.spawn(move || {
                for i in 0..RESOURCES {
                    map.register(group(g), resource(i));
                    map.register(group(g), resource(i));
                }
                for i in (1..RESOURCES).step_by(2) {
                    map.deregister(&group(g), &resource(i));
                    // Deregistering twice is a no-op
                    map.deregister(&group(g), &resource(i));
                }
            });
        }

        // Readers run alongside the writers
        for _ in 0..4 {
            let map = Arc::clone(&map);
            s.spawn(move || {
                for _ in 0..200 {
                    for i in 0..RESOURCES {
                        let owners = map.get(&resource(i));
                        let unique: HashSet<_> = owners.iter().collect();
                        assert_eq!(unique.len(), owners.len(), "Owner list has a repeated entry");
                        assert!(owners.len() <= GROUPS);
                    }
                }
            });
        }
    });

    for i in 0..RESOURCES {
        let owners = map.get(&resource(i));
        if i % 2 == 0 {
            let expected: HashSet<_> = (0..GROUPS).map(group).collect();
            assert_eq!(owners.len(), GROUPS);
            assert_eq!(owners.into_iter().collect::<HashSet<_>>(), expected);
        } else {
            assert!(owners.is_empty(), "{} should have no owners left", resource(i));
        }
    }

    assert_eq!(map.resources_of_kind(&GroupKind::new("", "ConfigMap")).len(), RESOURCES / 2);
    assert!(map.resources_of_kind(&GroupKind::new("apps", "Deployment")).is_empty());
    assert_eq!(map.watched_kinds(), [GroupKind::new("", "ConfigMap")].into_iter().collect());
}

#[test]
fn test_concurrent_reconcile_and_status_updates() {
    let map = Arc::new(ResourceMap::new());
    let all: Vec<ResourceIdentity> = (0..RESOURCES).map(resource).collect();
    let evens: Vec<ResourceIdentity> = (0..RESOURCES).step_by(2).map(resource).collect();

    thread::scope(|s| {
        for g in 0..GROUPS {
            let map = Arc::clone(&map);
            let all = all.clone();
            let evens = evens.clone();
            s.spawn(move || {
                map.reconcile_group(&group(g), &all);
                map.reconcile_group(&group(g), &evens);
            });
        }

        // Status writer racing with deregistration of odd resources
        let map = Arc::clone(&map);
        s.spawn(move || {
            for _ in 0..50 {
                for i in 0..RESOURCES {
                    map.set_status(&resource(i), CachedStatus::new(crds::ResourceState::Current));
                }
            }
        });
    });

    for g in 0..GROUPS {
        assert_eq!(map.resources_of_group(&group(g)).len(), RESOURCES / 2);
    }
    for i in (1..RESOURCES).step_by(2) {
        assert!(map.get(&resource(i)).is_empty());
        assert!(map.get_status(&resource(i)).is_none(), "Status outlived its last owner");
    }
}
