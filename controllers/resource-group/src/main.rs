//! ResourceGroup Controller
//!
//! Aggregates the status of arbitrary Kubernetes objects into the
//! `ResourceGroup` that lists them.
//!
//! The controller keeps an inventory mapping every listed object to the groups
//! that reference it, watches every referenced kind, and turns each change of a
//! watched object into one reconcile event per owning group.

mod backoff;
mod config;
mod controller;
mod error;
mod handler;
mod root;
mod status;
mod watch;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Install the ring provider before any TLS client is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting ResourceGroup Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Event queue capacity: {}", config.queue_capacity);
    info!(
        "  Enqueue timeout: {}",
        config
            .enqueue_timeout
            .map_or_else(|| "none".to_string(), |t| format!("{}s", t.as_secs()))
    );
    info!(
        "  Discovery backoff: {}s..{}s",
        config.backoff_min_secs, config.backoff_max_secs
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
