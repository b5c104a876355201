//! Kubernetes cloud lifecycle management
//!
//! Provides fleet management of Kubernetes clusters ("clouds"):
//! - Registration of existing clusters via kubeconfig
//! - Provisioning of self-built clusters with rollback
//! - A live client per reachable cloud, rebuilt at startup
//! - Background health monitoring of every registered cloud

pub mod client;
pub mod cluster;
pub mod error;
pub mod registry;
pub mod store;
pub mod types;

use cloudfleet_common::{Cloud, CloudList, CloudPage, CloudStatus, CloudType, PageOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::FleetConfig;
use crate::log_cloud_operation;
use client::{ClientFactory, ClientHandle};
use cluster::builder::{build_cloud, BuildPlan, BuiltCloud};
use cluster::deploy::{ClusterDeployer, DeployState, DeployTicket, DeployTracker, UnconfiguredDeployer};
use cluster::health::HealthMonitor;
use error::{CloudError, CloudResult};
use registry::ClientRegistry;
use store::{Cipher, CloudStore};
use types::{
    BuildCloudRequest, CloudRecord, CreateCloudRequest, CreateNamespaceRequest, NamespaceInfo,
    NewCloud, UpdateCloudRequest,
};

const DEFAULT_PAGE: i64 = 1;

/// Tunables of the cloud manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Namespace ensured on every registered cluster
    pub system_namespace: String,
    /// Namespace read by ping
    pub ping_namespace: String,
    pub default_page_size: i64,
    pub monitor_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&FleetConfig::default())
    }
}

impl ManagerSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            system_namespace: config.clouds.system_namespace.clone(),
            ping_namespace: config.clouds.ping_namespace.clone(),
            default_page_size: config.clouds.default_page_size,
            monitor_interval: config.monitor.interval(),
            probe_timeout: config.monitor.probe_timeout(),
        }
    }
}

/// Live client plus the facts read through it
struct Attached {
    client: ClientHandle,
    kube_version: String,
    node_number: i64,
    credential: Vec<u8>,
}

/// Cloud lifecycle manager
///
/// Owns no state besides the shared client registry and deploy tracker;
/// everything durable goes through the store.
#[derive(Clone)]
pub struct CloudManager {
    store: Arc<dyn CloudStore>,
    cipher: Arc<dyn Cipher>,
    factory: Arc<dyn ClientFactory>,
    deployer: Arc<dyn ClusterDeployer>,
    registry: ClientRegistry,
    tracker: DeployTracker,
    settings: ManagerSettings,
}

impl CloudManager {
    pub fn new(
        store: Arc<dyn CloudStore>,
        cipher: Arc<dyn Cipher>,
        factory: Arc<dyn ClientFactory>,
        registry: ClientRegistry,
    ) -> Self {
        Self {
            store,
            cipher,
            factory,
            deployer: Arc::new(UnconfiguredDeployer),
            registry,
            tracker: DeployTracker::new(),
            settings: ManagerSettings::default(),
        }
    }

    pub fn with_deployer(mut self, deployer: Arc<dyn ClusterDeployer>) -> Self {
        self.deployer = deployer;
        self
    }

    pub fn with_settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Register an existing cluster from its kubeconfig
    pub async fn create(&self, request: CreateCloudRequest) -> CloudResult<Cloud> {
        if request.name.trim().is_empty() {
            return Err(CloudError::Validation("Cloud name is required".to_string()));
        }
        if request.kubeconfig.trim().is_empty() {
            return Err(CloudError::Validation("Kubeconfig is required".to_string()));
        }

        let attached = self.attach(request.kubeconfig.as_bytes()).await?;

        let record = self
            .store
            .create(&NewCloud {
                name: generate_name(CloudType::Standard),
                alias_name: request.name.clone(),
                status: CloudStatus::Normal,
                cloud_type: CloudType::Standard,
                kube_version: attached.kube_version,
                node_number: attached.node_number,
                credential: attached.credential,
                description: request.description.unwrap_or_default(),
            })
            .await
            .map_err(|e| {
                error!(alias = %request.name, "Failed to persist cloud: {}", e);
                e
            })?;

        // The row stays if this fails; the next load reconciles it
        self.ensure_system_namespace(&attached.client, &record.name)
            .await?;

        self.registry.add(&record.name, attached.client).await;
        log_cloud_operation!("create", record.name, id = record.id);

        Ok(record.to_cloud())
    }

    /// Provision a self-built cluster; deployment runs in the background when `immediate`
    pub async fn build(&self, request: BuildCloudRequest) -> CloudResult<Cloud> {
        let plan = BuildPlan::from_request(generate_name(CloudType::SelfBuilt), &request)?;
        let built = build_cloud(self.store.as_ref(), plan).await?;
        let cloud = built.record.to_cloud();

        log_cloud_operation!("build", cloud.name, id = cloud.id, immediate = request.immediate);

        if request.immediate {
            let ticket = self.tracker.start(cloud.id).await;
            self.spawn_deploy(built, ticket);
        }

        Ok(cloud)
    }

    /// Start deploying a self-built cloud that was created without `immediate`
    pub async fn deploy(&self, id: i64) -> CloudResult<DeployState> {
        let record = self.store.get(id).await?;
        if record.cloud_type != CloudType::SelfBuilt {
            return Err(CloudError::Validation(format!(
                "Cloud {} is not self-built",
                record.name
            )));
        }
        let ticket = self.tracker.try_start(id).await.ok_or_else(|| {
            CloudError::Conflict(format!("Cloud {} is already being deployed", record.name))
        })?;

        let layout = match self.store.get_cluster(id).await {
            Ok(cluster) => self.store.list_nodes(id).await.map(|nodes| (cluster, nodes)),
            Err(e) => Err(e),
        };
        let (cluster, nodes) = match layout {
            Ok(layout) => layout,
            Err(e) => {
                self.tracker.release(&ticket).await;
                return Err(e);
            }
        };

        self.spawn_deploy(
            BuiltCloud {
                record,
                cluster,
                nodes,
            },
            ticket,
        );

        Ok(DeployState::Running)
    }

    /// Fetch one cloud
    pub async fn get(&self, id: i64) -> CloudResult<Cloud> {
        Ok(self.store.get(id).await?.to_cloud())
    }

    /// Change display fields and optionally replace the credential
    ///
    /// A new kubeconfig is validated like on create; on success the cloud is
    /// marked Normal and its client is registered again.
    pub async fn update(&self, id: i64, request: UpdateCloudRequest) -> CloudResult<Cloud> {
        if let Some(alias) = &request.alias_name {
            if alias.trim().is_empty() {
                return Err(CloudError::Validation("Cloud name cannot be empty".to_string()));
            }
        }
        if let Some(kubeconfig) = &request.kubeconfig {
            if kubeconfig.trim().is_empty() {
                return Err(CloudError::Validation("Kubeconfig cannot be empty".to_string()));
            }
        }

        let mut record = self.store.get(id).await?;
        record.resource_version = request.resource_version;
        if let Some(alias) = request.alias_name {
            record.alias_name = alias;
        }
        if let Some(description) = request.description {
            record.description = description;
        }

        let attached = match &request.kubeconfig {
            Some(kubeconfig) => Some(self.attach(kubeconfig.as_bytes()).await?),
            None => None,
        };
        let client = attached.map(|a| {
            record.kube_version = a.kube_version;
            record.node_number = a.node_number;
            record.credential = a.credential;
            record.status = CloudStatus::Normal;
            a.client
        });

        let updated = self.store.update(&record).await?;

        if let Some(client) = client {
            self.ensure_system_namespace(&client, &updated.name).await?;
            self.registry.add(&updated.name, client).await;
            log_cloud_operation!("reconnect", updated.name, id = updated.id);
        }

        log_cloud_operation!("update", updated.name, version = updated.resource_version);
        Ok(updated.to_cloud())
    }

    /// Remove a cloud, its client and, for self-built clouds, its spec and nodes
    ///
    /// The cascade stops at the first failing step.
    pub async fn delete(&self, id: i64) -> CloudResult<Cloud> {
        let record = self.store.delete(id).await?;
        self.registry.delete(&record.name).await;
        self.tracker.remove(id).await;

        if record.cloud_type == CloudType::SelfBuilt {
            self.store.delete_cluster(id).await.map_err(|e| {
                error!(cloud = %record.name, "Failed to delete cluster spec: {}", e);
                e
            })?;
            self.store.delete_nodes(id).await.map_err(|e| {
                error!(cloud = %record.name, "Failed to delete nodes: {}", e);
                e
            })?;
        }

        log_cloud_operation!("delete", record.name, id = id);
        Ok(record.to_cloud())
    }

    /// List clouds; page 0 returns everything
    pub async fn list(&self, options: PageOptions) -> CloudResult<CloudList> {
        if options.page == 0 {
            let clouds = self.store.list().await?;
            return Ok(CloudList::All(clouds.iter().map(CloudRecord::to_cloud).collect()));
        }

        let page = if options.page < 0 {
            DEFAULT_PAGE
        } else {
            options.page
        };
        let limit = if options.limit <= 0 {
            self.settings.default_page_size
        } else {
            options.limit
        };

        let (clouds, total) = self.store.page_list(page, limit).await?;
        Ok(CloudList::Page(CloudPage {
            data: clouds.iter().map(CloudRecord::to_cloud).collect(),
            total,
        }))
    }

    /// Check that a kubeconfig yields a client
    ///
    /// Only client construction decides the outcome; a failed read of the
    /// ping namespace is logged and still reported as success.
    pub async fn ping(&self, kubeconfig: &[u8]) -> CloudResult<()> {
        if kubeconfig.is_empty() {
            return Err(CloudError::Validation("Kubeconfig is required".to_string()));
        }

        let client = self.factory.connect(kubeconfig).await.map_err(connectivity)?;

        match client.get_namespace(&self.settings.ping_namespace).await {
            Ok(_) => debug!(server = %client.api_server(), "Ping succeeded"),
            Err(e) => warn!(
                server = %client.api_server(),
                "Ping could not read namespace {}: {}",
                self.settings.ping_namespace,
                e
            ),
        }

        Ok(())
    }

    /// Rebuild the registry from storage and start the health monitor
    ///
    /// Only Normal clouds are connected. A Normal cloud whose credential
    /// cannot be turned into a client is logged and skipped without
    /// touching its stored status.
    pub async fn load(&self, shutdown: watch::Receiver<bool>) -> CloudResult<JoinHandle<()>> {
        self.registry.clear().await;

        let clouds = self.store.list().await?;
        let total = clouds.len();
        let mut connected = 0;

        for record in clouds {
            if !record.status.is_normal() {
                debug!(cloud = %record.name, status = %record.status, "Skipping cloud on load");
                continue;
            }

            match self.restore_client(&record).await {
                Ok(client) => {
                    self.registry.add(&record.name, client).await;
                    connected += 1;
                }
                Err(e) => {
                    // Status is left alone; update with a new kubeconfig reconnects it
                    error!(cloud = %record.name, "Failed to restore client, skipping: {}", e);
                }
            }
        }

        info!("Loaded {} of {} clouds into the client registry", connected, total);

        let monitor = HealthMonitor::new(self.store.clone(), self.registry.clone())
            .with_interval(self.settings.monitor_interval)
            .with_probe_timeout(self.settings.probe_timeout);

        Ok(tokio::spawn(monitor.run(shutdown)))
    }

    pub async fn list_namespaces(&self, cloud: &str) -> CloudResult<Vec<NamespaceInfo>> {
        self.client_for(cloud).await?.list_namespaces().await
    }

    pub async fn get_namespace(&self, cloud: &str, namespace: &str) -> CloudResult<NamespaceInfo> {
        self.client_for(cloud).await?.get_namespace(namespace).await
    }

    pub async fn create_namespace(
        &self,
        cloud: &str,
        request: &CreateNamespaceRequest,
    ) -> CloudResult<NamespaceInfo> {
        if request.name.trim().is_empty() {
            return Err(CloudError::Validation("Namespace name is required".to_string()));
        }
        let client = self.client_for(cloud).await?;
        let created = client.create_namespace(request).await?;
        info!(cloud = %cloud, namespace = %created.name, "Namespace created");
        Ok(created)
    }

    pub async fn delete_namespace(&self, cloud: &str, namespace: &str) -> CloudResult<()> {
        let client = self.client_for(cloud).await?;
        client.delete_namespace(namespace).await?;
        info!(cloud = %cloud, namespace = %namespace, "Namespace deleted");
        Ok(())
    }

    pub async fn deploy_state(&self, id: i64) -> Option<DeployState> {
        self.tracker.state(id).await
    }

    pub async fn cancel_deploy(&self, id: i64) -> CloudResult<()> {
        if self.tracker.cancel(id).await {
            info!(id = id, "Deployment cancelled");
            Ok(())
        } else {
            Err(CloudError::Conflict(format!(
                "No running deployment for cloud {}",
                id
            )))
        }
    }

    /// Registered client of a cloud; NotFound when no cloud has that name
    async fn client_for(&self, cloud: &str) -> CloudResult<ClientHandle> {
        if let Some(client) = self.registry.get(cloud).await {
            return Ok(client);
        }

        self.store.get_by_name(cloud).await?;
        Err(CloudError::ClusterNotConnected(format!(
            "failed to find cloud client for {}",
            cloud
        )))
    }

    /// Connect with raw credentials, read cluster facts and encrypt the credential
    async fn attach(&self, kubeconfig: &[u8]) -> CloudResult<Attached> {
        let client = self.factory.connect(kubeconfig).await.map_err(connectivity)?;

        let nodes = client.list_nodes(1).await.map_err(|e| {
            CloudError::Connectivity(format!(
                "Failed to list nodes on {}: {}",
                client.api_server(),
                e
            ))
        })?;
        let kube_version = nodes.kubelet_versions.first().cloned().ok_or_else(|| {
            CloudError::Connectivity(format!("{} reports no nodes", client.api_server()))
        })?;
        let node_number = nodes.total();

        let credential = self.cipher.encrypt(kubeconfig).await?;

        Ok(Attached {
            client,
            kube_version,
            node_number,
            credential,
        })
    }

    async fn restore_client(&self, record: &CloudRecord) -> CloudResult<ClientHandle> {
        let kubeconfig = self.cipher.decrypt(&record.credential).await?;
        self.factory.connect(&kubeconfig).await
    }

    async fn ensure_system_namespace(&self, client: &ClientHandle, cloud: &str) -> CloudResult<()> {
        let request = CreateNamespaceRequest::named(self.settings.system_namespace.clone());
        match client.create_namespace(&request).await {
            Ok(_) => {
                debug!(cloud = %cloud, "Created namespace {}", request.name);
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => {
                error!(cloud = %cloud, "Failed to create namespace {}: {}", request.name, e);
                Err(e)
            }
        }
    }

    fn spawn_deploy(&self, built: BuiltCloud, ticket: DeployTicket) {
        let manager = self.clone();

        tokio::spawn(async move {
            let state = manager.run_deploy(&built, &ticket).await;
            manager.finish_deploy(&ticket, state).await;
        });
    }

    /// Only the deployer call is cancellable; adoption runs to completion
    async fn run_deploy(&self, built: &BuiltCloud, ticket: &DeployTicket) -> DeployState {
        let record = &built.record;
        info!(cloud = %record.name, nodes = built.nodes.len(), "Deployment started");

        let deployed = tokio::select! {
            _ = ticket.token().cancelled() => {
                info!(cloud = %record.name, "Deployment cancelled");
                return DeployState::Cancelled;
            }
            deployed = self.deployer.deploy(record, &built.cluster, &built.nodes) => deployed,
        };

        let outcome = match deployed {
            Ok(Some(kubeconfig)) => self.adopt_deployed(record, &kubeconfig).await,
            Ok(None) => {
                info!(cloud = %record.name, "Deployment finished without a kubeconfig");
                return DeployState::Succeeded;
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                // Deleted or superseded while adopting
                if !self.tracker.is_current(ticket).await {
                    self.registry.delete(&record.name).await;
                }
                DeployState::Succeeded
            }
            Err(e) => {
                error!(cloud = %record.name, "Deployment failed: {}", e);
                let status = CloudStatus::after_deploy(false);
                if let Err(e) = self.store.set_status(&record.name, status).await {
                    warn!(cloud = %record.name, "Failed to record deployment failure: {}", e);
                }
                DeployState::Failed(e.to_string())
            }
        }
    }

    /// Store the credential of a freshly deployed cluster and register its client
    async fn adopt_deployed(&self, record: &CloudRecord, kubeconfig: &[u8]) -> CloudResult<()> {
        let attached = self.attach(kubeconfig).await?;

        // Re-read so the update carries the current resource version
        let mut current = self.store.get(record.id).await?;
        current.credential = attached.credential;
        current.kube_version = attached.kube_version;
        current.node_number = attached.node_number;
        current.status = CloudStatus::after_deploy(true);

        let updated = self.store.update(&current).await?;
        self.ensure_system_namespace(&attached.client, &updated.name)
            .await?;
        self.registry.add(&updated.name, attached.client).await;

        log_cloud_operation!("deploy", updated.name, id = updated.id);
        Ok(())
    }

    async fn finish_deploy(&self, ticket: &DeployTicket, state: DeployState) {
        debug!(id = ticket.cloud_id, state = ?state, "Deployment finished");
        self.tracker.finish(ticket, state).await;
    }
}

/// System-assigned cloud name
fn generate_name(cloud_type: CloudType) -> String {
    let prefix = match cloud_type {
        CloudType::Standard => "cld",
        CloudType::SelfBuilt => "bld",
    };
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}

/// Client construction failures are always reported as connectivity errors
fn connectivity(err: CloudError) -> CloudError {
    match err {
        CloudError::Connectivity(_) => err,
        other => CloudError::Connectivity(other.to_string()),
    }
}
