//! ResourceGroup CRD Definitions
//!
//! Kubernetes Custom Resource Definition for the ResourceGroup controller,
//! plus the identity types shared by the resource map and the event handler.

pub mod identity;
pub mod resource_group;

pub use identity::*;
pub use resource_group::*;
