//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the resource map,
//! the watch manager and both reconcilers together, and supervises their tasks.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::root::RootReconciler;
use crate::status::StatusReconciler;
use crate::watch::WatchManager;
use crds::ResourceGroup;
use kube::{Api, Client};
use resource_map::ResourceMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long the status reconciler may take to drain after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main controller for ResourceGroup status aggregation.
pub struct Controller {
    watches: Arc<WatchManager>,
    root_watcher: JoinHandle<Result<(), ControllerError>>,
    status_reconciler: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing ResourceGroup Controller");

        let client = Client::try_default().await?;

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let map = Arc::new(ResourceMap::new());
        let watches = Arc::new(WatchManager::new(
            client.clone(),
            map.clone(),
            queue_tx.clone(),
            &config,
        ));

        let rg_api: Api<ResourceGroup> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let root = RootReconciler::new(rg_api, map.clone(), watches.clone(), queue_tx);
        let status = StatusReconciler::new(client, map, watches.clone());

        let status_reconciler = tokio::spawn(async move { status.run(queue_rx).await });
        let root_watcher = tokio::spawn(async move { root.watch().await });

        Ok(Self {
            watches,
            root_watcher,
            status_reconciler,
        })
    }

    /// Runs the controller until ctrl-c or until a task exits.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("ResourceGroup Controller running");

        let Self {
            watches,
            mut root_watcher,
            mut status_reconciler,
        } = self;

        let mut root_done = false;
        let mut status_done = false;
        let result = tokio::select! {
            result = &mut root_watcher => {
                root_done = true;
                result
                    .map_err(|e| ControllerError::Watch(format!("ResourceGroup watcher panicked: {e}")))
                    .and_then(|r| r)
            }
            result = &mut status_reconciler => {
                status_done = true;
                match result {
                    Ok(()) => Err(ControllerError::Reconciliation("Status reconciler exited".to_string())),
                    Err(e) => Err(ControllerError::Reconciliation(format!("Status reconciler panicked: {e}"))),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
                }
                Ok(())
            }
        };

        info!(
            watched_kinds = watches.watched_kinds().len(),
            "Shutting down ResourceGroup Controller"
        );
        watches.shutdown();
        if !root_done {
            root_watcher.abort();
            let _ = root_watcher.await;
        }
        drop(watches);

        // With every sender gone the status reconciler drains the queue and exits
        if !status_done
            && tokio::time::timeout(DRAIN_TIMEOUT, &mut status_reconciler)
                .await
                .is_err()
        {
            warn!("Status reconciler did not drain in time; aborting");
            status_reconciler.abort();
        }

        result
    }
}
