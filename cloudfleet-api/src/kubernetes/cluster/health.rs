//! Cluster health monitoring
//!
//! Periodically probes every registered cluster and persists status
//! transitions. Only changes are written; an unchanged status costs one
//! probe and no storage call.

use cloudfleet_common::CloudStatus;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::kubernetes::registry::ClientRegistry;
use crate::kubernetes::store::CloudStore;

/// Background prober reconciling cluster reachability with stored status
pub struct HealthMonitor {
    store: Arc<dyn CloudStore>,
    registry: ClientRegistry,
    interval: Duration,
    probe_timeout: Duration,
    /// Last status persisted per cloud name
    statuses: HashMap<String, CloudStatus>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn CloudStore>, registry: ClientRegistry) -> Self {
        Self {
            store,
            registry,
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            statuses: HashMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn last_status(&self, name: &str) -> Option<CloudStatus> {
        self.statuses.get(name).copied()
    }

    /// Probe every registered cluster once and persist what changed
    pub async fn sweep(&mut self) {
        let clients = self.registry.list().await;

        // Forget clouds that were removed since the last sweep
        self.statuses.retain(|name, _| clients.contains_key(name));

        let probe_timeout = self.probe_timeout;
        let probes = clients.into_iter().map(|(name, client)| async move {
            // The client enforces its own deadline; this bounds a hung transport
            let result = tokio::time::timeout(probe_timeout, client.probe(probe_timeout)).await;
            let healthy = match result {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!(cloud = %name, "Health probe failed: {}", e);
                    false
                }
                Err(_) => {
                    debug!(cloud = %name, "Health probe timed out after {:?}", probe_timeout);
                    false
                }
            };
            (name, CloudStatus::from_probe(healthy))
        });

        for (name, status) in join_all(probes).await {
            if self.statuses.get(&name) == Some(&status) {
                continue;
            }

            match self.statuses.get(&name) {
                Some(previous) => {
                    info!(cloud = %name, "Cloud status changed: {} -> {}", previous, status)
                }
                None => debug!(cloud = %name, "Cloud status observed: {}", status),
            }

            if let Err(e) = self.store.set_status(&name, status).await {
                warn!(cloud = %name, "Failed to persist status {}: {}", status, e);
            }
            self.statuses.insert(name, status);
        }
    }

    /// Sweep every interval until shutdown is signalled
    ///
    /// Shutdown is checked between sweeps only.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Health monitor started (interval {:?}, probe timeout {:?})",
            self.interval, self.probe_timeout
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Health monitor stopped");
    }
}
