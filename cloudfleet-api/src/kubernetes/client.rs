//! Kubernetes client wrapper
//!
//! Defines the client handle the rest of the subsystem works with and wraps
//! the kube-rs Client behind it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;

use super::error::{CloudError, CloudResult};
use super::types::{CreateNamespaceRequest, NamespaceInfo, NodeList};

/// Shared handle to a live cluster client
pub type ClientHandle = Arc<dyn ClusterClient>;

/// Operations the control plane issues against one cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// API server URL this client talks to
    fn api_server(&self) -> String;

    /// List at most `limit` nodes
    async fn list_nodes(&self, limit: u32) -> CloudResult<NodeList>;

    /// Cheap reachability check bounded by `timeout`
    async fn probe(&self, timeout: Duration) -> CloudResult<()>;

    async fn list_namespaces(&self) -> CloudResult<Vec<NamespaceInfo>>;

    async fn get_namespace(&self, name: &str) -> CloudResult<NamespaceInfo>;

    async fn create_namespace(&self, request: &CreateNamespaceRequest)
        -> CloudResult<NamespaceInfo>;

    async fn delete_namespace(&self, name: &str) -> CloudResult<()>;
}

/// Builds client handles from raw kubeconfig bytes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Fails on malformed credentials; reachability is checked by the caller
    async fn connect(&self, kubeconfig: &[u8]) -> CloudResult<ClientHandle>;
}

/// Factory producing kube-rs backed clients
#[derive(Debug, Default, Clone)]
pub struct KubeClientFactory;

#[async_trait]
impl ClientFactory for KubeClientFactory {
    async fn connect(&self, kubeconfig: &[u8]) -> CloudResult<ClientHandle> {
        let client = K8sClient::from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(client))
    }
}

/// Wrapper around kube-rs Client with its API server address
#[derive(Clone)]
pub struct K8sClient {
    inner: Client,
    api_server: String,
}

impl K8sClient {
    /// Create client from kubeconfig YAML using its current context
    pub async fn from_kubeconfig(data: &[u8]) -> CloudResult<Self> {
        let yaml = std::str::from_utf8(data).map_err(|e| {
            CloudError::Connectivity(format!("Kubeconfig is not valid UTF-8: {}", e))
        })?;

        let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| {
            CloudError::Connectivity(format!("Failed to parse kubeconfig: {}", e))
        })?;

        let api_server = Self::extract_api_server(&kubeconfig)?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| CloudError::Connectivity(format!("Failed to create config: {}", e)))?;

        let client = Client::try_from(config)
            .map_err(|e| CloudError::Connectivity(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            inner: client,
            api_server,
        })
    }

    /// Extract API server URL of the current context
    fn extract_api_server(kubeconfig: &Kubeconfig) -> CloudResult<String> {
        let context_name = kubeconfig.current_context.clone().ok_or_else(|| {
            CloudError::Connectivity("Kubeconfig has no current-context".into())
        })?;

        let context = kubeconfig
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| {
                CloudError::Connectivity(format!("Context '{}' not found", context_name))
            })?;

        let cluster_name = context
            .context
            .as_ref()
            .map(|c| c.cluster.as_str())
            .ok_or_else(|| CloudError::Connectivity("Context has no cluster reference".into()))?;

        let cluster = kubeconfig
            .clusters
            .iter()
            .find(|c| c.name == cluster_name)
            .ok_or_else(|| {
                CloudError::Connectivity(format!("Cluster '{}' not found", cluster_name))
            })?;

        cluster
            .cluster
            .as_ref()
            .and_then(|c| c.server.clone())
            .ok_or_else(|| CloudError::Connectivity("Cluster has no server URL".into()))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.inner.clone())
    }
}

#[async_trait]
impl ClusterClient for K8sClient {
    fn api_server(&self) -> String {
        self.api_server.clone()
    }

    async fn list_nodes(&self, limit: u32) -> CloudResult<NodeList> {
        let nodes: Api<Node> = Api::all(self.inner.clone());
        let list = nodes.list(&ListParams::default().limit(limit)).await?;

        let kubelet_versions = list
            .items
            .into_iter()
            .map(|node| {
                node.status
                    .and_then(|s| s.node_info)
                    .map(|info| info.kubelet_version)
                    .unwrap_or_default()
            })
            .collect();

        Ok(NodeList {
            kubelet_versions,
            remaining: list.metadata.remaining_item_count,
        })
    }

    async fn probe(&self, timeout: Duration) -> CloudResult<()> {
        let params = ListParams::default()
            .limit(1)
            .timeout(timeout.as_secs().max(1) as u32);

        match tokio::time::timeout(timeout, self.namespaces().list(&params)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(CloudError::Kube(e)),
            Err(_) => Err(CloudError::Connectivity(format!(
                "{} did not answer within {:?}",
                self.api_server, timeout
            ))),
        }
    }

    async fn list_namespaces(&self) -> CloudResult<Vec<NamespaceInfo>> {
        let list = self.namespaces().list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(namespace_to_info).collect())
    }

    async fn get_namespace(&self, name: &str) -> CloudResult<NamespaceInfo> {
        let ns = self.namespaces().get(name).await?;
        Ok(namespace_to_info(ns))
    }

    async fn create_namespace(
        &self,
        request: &CreateNamespaceRequest,
    ) -> CloudResult<NamespaceInfo> {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(request.name.clone()),
                labels: if request.labels.is_empty() {
                    None
                } else {
                    Some(request.labels.clone())
                },
                annotations: if request.annotations.is_empty() {
                    None
                } else {
                    Some(request.annotations.clone())
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let created = self.namespaces().create(&PostParams::default(), &ns).await?;
        Ok(namespace_to_info(created))
    }

    async fn delete_namespace(&self, name: &str) -> CloudResult<()> {
        self.namespaces().delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

fn namespace_to_info(ns: Namespace) -> NamespaceInfo {
    let metadata = ns.metadata;
    let status = ns.status.and_then(|s| s.phase).unwrap_or_default();

    NamespaceInfo {
        name: metadata.name.unwrap_or_default(),
        status,
        labels: metadata.labels.unwrap_or_default(),
        annotations: metadata.annotations.unwrap_or_default(),
        created_at: metadata.creation_timestamp.map(|t| t.0.to_rfc3339()),
    }
}

impl std::fmt::Debug for K8sClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sClient")
            .field("api_server", &self.api_server)
            .finish()
    }
}
