//! Deployment task tracking
//!
//! A build may hand its cluster to a background deployment. Each deployment
//! is tracked per cloud id with an observable state and a cancellation token.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::kubernetes::error::{CloudError, CloudResult};
use crate::kubernetes::types::{ClusterSpecRecord, CloudRecord, NodeRecord};

/// Installs Kubernetes on the nodes of a self-built cloud
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterDeployer: Send + Sync {
    /// Returns the kubeconfig of the new cluster when the deployer produces one
    async fn deploy(
        &self,
        cloud: &CloudRecord,
        spec: &ClusterSpecRecord,
        nodes: &[NodeRecord],
    ) -> CloudResult<Option<Vec<u8>>>;
}

/// Deployer used when no provisioning backend is wired in
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredDeployer;

#[async_trait]
impl ClusterDeployer for UnconfiguredDeployer {
    async fn deploy(
        &self,
        cloud: &CloudRecord,
        _spec: &ClusterSpecRecord,
        _nodes: &[NodeRecord],
    ) -> CloudResult<Option<Vec<u8>>> {
        Err(CloudError::Deploy(format!(
            "Automated deployment is not configured; cloud {} must be deployed manually",
            cloud.name
        )))
    }
}

/// Observable state of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum DeployState {
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl DeployState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Handle given to a running deployment task
#[derive(Debug, Clone)]
pub struct DeployTicket {
    pub cloud_id: i64,
    generation: u64,
    token: CancellationToken,
}

impl DeployTicket {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

struct TrackedDeploy {
    generation: u64,
    state: DeployState,
    token: CancellationToken,
}

/// Per-cloud record of deployment tasks
#[derive(Clone, Default)]
pub struct DeployTracker {
    tasks: Arc<RwLock<HashMap<i64, TrackedDeploy>>>,
    generation: Arc<AtomicU64>,
}

impl DeployTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a deployment as running, cancelling any earlier one for the same cloud
    pub async fn start(&self, cloud_id: i64) -> DeployTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let mut tasks = self.tasks.write().await;
        if let Some(previous) = tasks.insert(
            cloud_id,
            TrackedDeploy {
                generation,
                state: DeployState::Running,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        DeployTicket {
            cloud_id,
            generation,
            token,
        }
    }

    /// Start a deployment unless one is already running for the cloud
    ///
    /// The check and the insert happen under one write lock.
    pub async fn try_start(&self, cloud_id: i64) -> Option<DeployTicket> {
        let mut tasks = self.tasks.write().await;
        if matches!(tasks.get(&cloud_id), Some(entry) if entry.state == DeployState::Running) {
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        tasks.insert(
            cloud_id,
            TrackedDeploy {
                generation,
                state: DeployState::Running,
                token: token.clone(),
            },
        );

        Some(DeployTicket {
            cloud_id,
            generation,
            token,
        })
    }

    /// Drop a ticket whose task was never spawned
    pub async fn release(&self, ticket: &DeployTicket) {
        let mut tasks = self.tasks.write().await;
        if matches!(tasks.get(&ticket.cloud_id), Some(entry) if entry.generation == ticket.generation)
        {
            tasks.remove(&ticket.cloud_id);
        }
    }

    /// Record the outcome of a deployment
    ///
    /// Ignored when the ticket was superseded by a newer deployment or the
    /// entry was removed. A success still replaces a cancellation that
    /// arrived after the deployer had returned.
    pub async fn finish(&self, ticket: &DeployTicket, state: DeployState) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(&ticket.cloud_id) {
            if entry.generation != ticket.generation {
                return;
            }
            let late_success =
                entry.state == DeployState::Cancelled && state == DeployState::Succeeded;
            if !entry.state.is_finished() || late_success {
                entry.state = state;
            }
        }
    }

    /// Whether the ticket still owns the cloud's entry
    pub async fn is_current(&self, ticket: &DeployTicket) -> bool {
        matches!(
            self.tasks.read().await.get(&ticket.cloud_id),
            Some(entry) if entry.generation == ticket.generation
        )
    }

    pub async fn state(&self, cloud_id: i64) -> Option<DeployState> {
        self.tasks
            .read()
            .await
            .get(&cloud_id)
            .map(|entry| entry.state.clone())
    }

    /// Cancel a running deployment; returns whether one was running
    pub async fn cancel(&self, cloud_id: i64) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&cloud_id) {
            Some(entry) if entry.state == DeployState::Running => {
                entry.token.cancel();
                entry.state = DeployState::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Cancel and forget the deployment of a removed cloud
    pub async fn remove(&self, cloud_id: i64) {
        if let Some(entry) = self.tasks.write().await.remove(&cloud_id) {
            entry.token.cancel();
        }
    }
}

impl std::fmt::Debug for DeployTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployTracker").finish_non_exhaustive()
    }
}
