//! Cloud lifecycle types
//!
//! Storage records, request payloads and simplified Kubernetes views used by
//! the cloud manager.

use cloudfleet_common::{Cloud, CloudStatus, CloudType, NodeRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stored cloud row, including the encrypted credential
#[derive(Debug, Clone, PartialEq)]
pub struct CloudRecord {
    pub id: i64,
    pub name: String,
    pub alias_name: String,
    pub status: CloudStatus,
    pub cloud_type: CloudType,
    pub kube_version: String,
    pub node_number: i64,
    /// Ciphertext of the kubeconfig; empty until a self-built cloud is deployed
    pub credential: Vec<u8>,
    pub description: String,
    pub resource_version: i64,
    pub created_at: i64,
    pub modified_at: i64,
}

impl CloudRecord {
    /// Public projection without the credential
    pub fn to_cloud(&self) -> Cloud {
        Cloud {
            id: self.id,
            resource_version: self.resource_version,
            name: self.name.clone(),
            alias_name: self.alias_name.clone(),
            status: self.status,
            cloud_type: self.cloud_type,
            kube_version: self.kube_version.clone(),
            node_number: self.node_number,
            description: self.description.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// Cloud row to be inserted; id and timestamps are assigned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewCloud {
    pub name: String,
    pub alias_name: String,
    pub status: CloudStatus,
    pub cloud_type: CloudType,
    pub kube_version: String,
    pub node_number: i64,
    pub credential: Vec<u8>,
    pub description: String,
}

/// Kubernetes settings of a self-built cloud
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpecRecord {
    pub cloud_id: i64,
    pub api_server: String,
    pub version: String,
    pub runtime: String,
    pub cni: String,
    pub service_cidr: String,
    pub pod_cidr: String,
    pub proxy_mode: String,
}

/// Machine belonging to a self-built cloud
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub cloud_id: i64,
    pub role: NodeRole,
    pub hostname: String,
    pub address: String,
    pub user: String,
    pub password: String,
}

/// Request to register an existing cluster
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCloudRequest {
    /// Display name
    pub name: String,
    /// Kubeconfig content (YAML)
    pub kubeconfig: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Request to provision a self-built cluster
#[derive(Debug, Clone, Deserialize)]
pub struct BuildCloudRequest {
    pub alias_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Start deployment right after the records are created
    #[serde(default)]
    pub immediate: bool,
    pub kubernetes: KubernetesSpec,
}

/// Desired cluster layout for a build
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubernetesSpec {
    #[serde(default)]
    pub api_server: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub cni: String,
    #[serde(default)]
    pub service_cidr: String,
    #[serde(default)]
    pub pod_cidr: String,
    #[serde(default)]
    pub proxy_mode: String,
    #[serde(default)]
    pub masters: Vec<NodeSpec>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// SSH-reachable machine to join a self-built cluster
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub address: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Request to update a cloud
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCloudRequest {
    /// Token read with the cloud; the update fails if it changed
    pub resource_version: i64,
    #[serde(default)]
    pub alias_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement kubeconfig; re-registers the client on success
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

/// Request to check a kubeconfig
#[derive(Debug, Clone, Deserialize)]
pub struct PingRequest {
    pub kubeconfig: String,
}

/// Result of a capped node listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeList {
    /// Kubelet version of each returned node
    pub kubelet_versions: Vec<String>,
    /// Items the server reported beyond the returned page
    pub remaining: Option<i64>,
}

impl NodeList {
    pub fn is_empty(&self) -> bool {
        self.kubelet_versions.is_empty()
    }

    /// Best known number of nodes in the cluster
    pub fn total(&self) -> i64 {
        self.kubelet_versions.len() as i64 + self.remaining.unwrap_or(0).max(0)
    }
}

/// Namespace information
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub status: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub created_at: Option<String>,
}

/// Create namespace request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateNamespaceRequest {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl CreateNamespaceRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}
