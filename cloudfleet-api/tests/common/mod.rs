//! Shared fixtures for the integration tests
//!
//! The mockall doubles only exist inside the library's own unit tests, so
//! these hand-written stubs stand in for live clusters here.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cloudfleet_api::db::Database;
use cloudfleet_api::encryption::{EncryptionConfig, EncryptionManager};
use cloudfleet_api::kubernetes::client::{ClientFactory, ClientHandle, ClusterClient};
use cloudfleet_api::kubernetes::error::{CloudError, CloudResult};
use cloudfleet_api::kubernetes::registry::ClientRegistry;
use cloudfleet_api::kubernetes::types::{CreateNamespaceRequest, NamespaceInfo, NodeList};
use cloudfleet_api::kubernetes::CloudManager;

pub const LAB_KUBECONFIG: &str = "apiVersion: v1\nkind: Config\ncurrent-context: lab\n";
pub const EDGE_KUBECONFIG: &str = "apiVersion: v1\nkind: Config\ncurrent-context: edge\n";

/// Fresh migrated in-memory database
///
/// A single connection keeps every query on the same in-memory instance.
pub async fn memory_db() -> Arc<Database> {
    let db = Database::new("sqlite::memory:", 1)
        .await
        .expect("in-memory database");
    db.migrate().await.expect("migrations");
    Arc::new(db)
}

pub async fn cipher() -> Arc<EncryptionManager> {
    let manager = EncryptionManager::new();
    manager
        .initialize(&EncryptionConfig {
            master_key: Some(EncryptionManager::generate_key_hex()),
            key_file: None,
            auto_generate: false,
        })
        .await
        .expect("encryption key");
    Arc::new(manager)
}

/// In-process cluster with a namespace table and a health switch
pub struct StubCluster {
    server: String,
    kubelet_versions: Vec<String>,
    healthy: AtomicBool,
    namespaces: Mutex<BTreeMap<String, NamespaceInfo>>,
}

impl StubCluster {
    pub fn new(server: &str, kubelet_versions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            server: server.to_string(),
            kubelet_versions: kubelet_versions.iter().map(|v| v.to_string()).collect(),
            healthy: AtomicBool::new(true),
            namespaces: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.lock().unwrap().contains_key(name)
    }
}

#[async_trait]
impl ClusterClient for StubCluster {
    fn api_server(&self) -> String {
        self.server.clone()
    }

    async fn list_nodes(&self, limit: u32) -> CloudResult<NodeList> {
        let returned = self.kubelet_versions.len().min(limit as usize);
        Ok(NodeList {
            kubelet_versions: self.kubelet_versions[..returned].to_vec(),
            remaining: Some((self.kubelet_versions.len() - returned) as i64),
        })
    }

    async fn probe(&self, _timeout: Duration) -> CloudResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CloudError::Connectivity(format!("{} is down", self.server)))
        }
    }

    async fn list_namespaces(&self) -> CloudResult<Vec<NamespaceInfo>> {
        Ok(self.namespaces.lock().unwrap().values().cloned().collect())
    }

    async fn get_namespace(&self, name: &str) -> CloudResult<NamespaceInfo> {
        self.namespaces
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::Internal(format!("namespace {} not found", name)))
    }

    async fn create_namespace(
        &self,
        request: &CreateNamespaceRequest,
    ) -> CloudResult<NamespaceInfo> {
        let mut namespaces = self.namespaces.lock().unwrap();
        if namespaces.contains_key(&request.name) {
            return Err(CloudError::Conflict(format!(
                "namespace {} already exists",
                request.name
            )));
        }
        let info = NamespaceInfo {
            name: request.name.clone(),
            status: "Active".to_string(),
            labels: request.labels.clone(),
            annotations: request.annotations.clone(),
            created_at: None,
        };
        namespaces.insert(request.name.clone(), info.clone());
        Ok(info)
    }

    async fn delete_namespace(&self, name: &str) -> CloudResult<()> {
        self.namespaces.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Resolves known kubeconfig texts to stub clusters
#[derive(Default)]
pub struct StubFactory {
    clusters: Mutex<HashMap<Vec<u8>, Arc<StubCluster>>>,
}

impl StubFactory {
    pub fn with(self, kubeconfig: &str, cluster: Arc<StubCluster>) -> Self {
        self.clusters
            .lock()
            .unwrap()
            .insert(kubeconfig.as_bytes().to_vec(), cluster);
        self
    }
}

#[async_trait]
impl ClientFactory for StubFactory {
    async fn connect(&self, kubeconfig: &[u8]) -> CloudResult<ClientHandle> {
        let cluster = self
            .clusters
            .lock()
            .unwrap()
            .get(kubeconfig)
            .cloned()
            .ok_or_else(|| CloudError::Connectivity("unknown kubeconfig".to_string()))?;
        let client: ClientHandle = cluster;
        Ok(client)
    }
}

/// Manager over a real store and cipher with stubbed clusters
pub async fn manager_with(db: Arc<Database>, factory: StubFactory) -> CloudManager {
    CloudManager::new(db, cipher().await, Arc::new(factory), ClientRegistry::new())
}
