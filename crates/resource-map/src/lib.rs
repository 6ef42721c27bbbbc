//! Resource Map
//!
//! In-memory, concurrency-safe index between watched resources and the
//! ResourceGroups that reference them.
//!
//! # Example
//!
//! ```
//! use resource_map::{OwnerRef, ResourceMap};
//! use crds::ResourceIdentity;
//!
//! let map = ResourceMap::new();
//! let owner = OwnerRef::new("ns1", "group1");
//! let cm = ResourceIdentity::new("", "ConfigMap", "ns1", "cm1");
//!
//! map.register(owner.clone(), cm.clone());
//! assert_eq!(map.get(&cm), vec![owner]);
//! ```
//!
//! # Components
//!
//! - **ResourceMap**: forward index (identity → owners, cached status) and type
//!   index (group/kind → identities) behind a single lock
//! - **ResourceMapping**: the read/status capability the event handler needs
//! - **extract_group_kinds**: the set of types a resource list requires watches for

pub mod group_kinds;
pub mod map;
#[path = "trait.rs"]
pub mod mapping_trait;
pub mod owner;
pub mod status;

pub use group_kinds::extract_group_kinds;
pub use map::{GroupDiff, ResourceMap};
pub use mapping_trait::ResourceMapping;
pub use owner::OwnerRef;
pub use status::CachedStatus;
