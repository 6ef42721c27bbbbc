//! Controller-specific error types.
//!
//! Per-object problems on the watch path are logged, not returned; these
//! errors cover startup, discovery and the Kubernetes API calls of the
//! reconcilers.

use thiserror::Error;
use kube::Error as KubeError;

/// Errors that can occur in the ResourceGroup Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// A referenced group/kind is not served by the API server
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),
}
