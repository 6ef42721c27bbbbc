//! Identity fields of watched objects.
//!
//! Watch callbacks deliver loosely-typed objects. The handler only needs four
//! fields from them, so it accepts anything implementing `WatchedObject`.
//! Adapters exist for `DynamicObject` (dynamic watches) and for unstructured
//! JSON (`serde_json::Value`).

use crds::{ResourceIdentity, group_of_api_version};
use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::Value;
use thiserror::Error;

/// An object carrying the fields that identify it.
///
/// Empty strings are reported as `None`.
pub trait WatchedObject {
    /// `apiVersion`, e.g. "apps/v1"
    fn api_version(&self) -> Option<&str>;
    /// `kind`, e.g. "Deployment"
    fn kind(&self) -> Option<&str>;
    /// `metadata.name`
    fn name(&self) -> Option<&str>;
    /// `metadata.namespace`, absent for cluster-scoped objects
    fn namespace(&self) -> Option<&str>;
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl WatchedObject for DynamicObject {
    fn api_version(&self) -> Option<&str> {
        non_empty(self.types.as_ref().map(|t| t.api_version.as_str()))
    }

    fn kind(&self) -> Option<&str> {
        non_empty(self.types.as_ref().map(|t| t.kind.as_str()))
    }

    fn name(&self) -> Option<&str> {
        non_empty(self.metadata.name.as_deref())
    }

    fn namespace(&self) -> Option<&str> {
        non_empty(self.metadata.namespace.as_deref())
    }
}

impl WatchedObject for Value {
    fn api_version(&self) -> Option<&str> {
        non_empty(self.get("apiVersion").and_then(Value::as_str))
    }

    fn kind(&self) -> Option<&str> {
        non_empty(self.get("kind").and_then(Value::as_str))
    }

    fn name(&self) -> Option<&str> {
        non_empty(self.pointer("/metadata/name").and_then(Value::as_str))
    }

    fn namespace(&self) -> Option<&str> {
        non_empty(self.pointer("/metadata/namespace").and_then(Value::as_str))
    }
}

/// Why an object could not be mapped to a `ResourceIdentity`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No `metadata.name`
    #[error("object has no metadata.name")]
    MissingName,

    /// No `kind` on the object and no expected type to fall back on
    #[error("object has no kind and the handler has no expected type")]
    MissingKind,
}

/// Derives the identity of `obj`.
///
/// Type fields missing from the object are taken from `expected`; list
/// responses commonly omit them. A missing namespace means cluster scope.
pub fn identity_of<O>(
    obj: &O,
    expected: Option<&GroupVersionKind>,
) -> Result<ResourceIdentity, IdentityError>
where
    O: WatchedObject + ?Sized,
{
    let name = obj.name().ok_or(IdentityError::MissingName)?;

    let kind = obj
        .kind()
        .or_else(|| non_empty(expected.map(|gvk| gvk.kind.as_str())))
        .ok_or(IdentityError::MissingKind)?;

    // The expected group only applies to an object of the expected kind
    let group = match (obj.api_version(), expected) {
        (Some(api_version), _) => group_of_api_version(api_version),
        (None, Some(gvk)) if gvk.kind == kind => gvk.group.as_str(),
        (None, _) => "",
    };

    Ok(ResourceIdentity::new(
        group,
        kind,
        obj.namespace().unwrap_or_default(),
        name,
    ))
}
