//! Cached per-resource status.

use crds::ResourceState;

/// Status last computed for a resource by the status reconciler.
///
/// The resource map stores and returns this value; it never inspects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedStatus {
    /// Observed state
    pub status: ResourceState,
    /// Optional detail for non-current states
    pub message: Option<String>,
}

impl CachedStatus {
    /// Create a cached status without a message
    #[must_use]
    pub fn new(status: ResourceState) -> Self {
        Self { status, message: None }
    }

    /// Attach a message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
