//! Self-built cluster provisioning
//!
//! Creates the cloud row, its cluster spec and its nodes as three dependent
//! stages. A failure after the cloud row exists removes that row again on a
//! best-effort basis; the cluster spec row is left behind if the node stage
//! fails.

use cloudfleet_common::{CloudStatus, CloudType, NodeRole};
use tracing::{debug, error, info, warn};

use crate::kubernetes::error::{CloudError, CloudResult};
use crate::kubernetes::store::CloudStore;
use crate::kubernetes::types::{
    BuildCloudRequest, ClusterSpecRecord, CloudRecord, NewCloud, NodeRecord, NodeSpec,
};

/// Rows to create for one self-built cloud
///
/// `cluster.cloud_id` and each node's `cloud_id` are filled in once the
/// cloud row has been created.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub cloud: NewCloud,
    pub cluster: ClusterSpecRecord,
    pub nodes: Vec<NodeRecord>,
}

impl BuildPlan {
    /// Validate a build request and lay out its rows, masters first
    pub fn from_request(name: String, request: &BuildCloudRequest) -> CloudResult<Self> {
        if request.alias_name.trim().is_empty() {
            return Err(CloudError::Validation("Cloud name is required".to_string()));
        }

        let k8s = &request.kubernetes;
        if k8s.masters.is_empty() && k8s.nodes.is_empty() {
            return Err(CloudError::Validation(
                "At least one master or worker node is required".to_string(),
            ));
        }

        let node = |role: NodeRole, spec: &NodeSpec| NodeRecord {
            cloud_id: 0,
            role,
            hostname: spec.hostname.clone(),
            address: spec.address.clone(),
            user: spec.user.clone(),
            password: spec.password.clone(),
        };

        let nodes = k8s
            .masters
            .iter()
            .map(|m| node(NodeRole::Master, m))
            .chain(k8s.nodes.iter().map(|w| node(NodeRole::Worker, w)))
            .collect::<Vec<_>>();

        Ok(Self {
            cloud: NewCloud {
                name,
                alias_name: request.alias_name.clone(),
                status: CloudStatus::Initializing,
                cloud_type: CloudType::SelfBuilt,
                kube_version: k8s.version.clone(),
                node_number: nodes.len() as i64,
                credential: Vec::new(),
                description: request.description.clone().unwrap_or_default(),
            },
            cluster: ClusterSpecRecord {
                cloud_id: 0,
                api_server: k8s.api_server.clone(),
                version: k8s.version.clone(),
                runtime: k8s.runtime.clone(),
                cni: k8s.cni.clone(),
                service_cidr: k8s.service_cidr.clone(),
                pod_cidr: k8s.pod_cidr.clone(),
                proxy_mode: k8s.proxy_mode.clone(),
            },
            nodes,
        })
    }
}

/// Rows written by a successful build
#[derive(Debug, Clone)]
pub struct BuiltCloud {
    pub record: CloudRecord,
    pub cluster: ClusterSpecRecord,
    pub nodes: Vec<NodeRecord>,
}

/// Run the three creation stages, rolling back the cloud row on failure
pub async fn build_cloud(store: &dyn CloudStore, plan: BuildPlan) -> CloudResult<BuiltCloud> {
    let BuildPlan {
        cloud,
        mut cluster,
        mut nodes,
    } = plan;

    let record = store.create(&cloud).await?;
    debug!(cloud = %record.name, id = record.id, "Cloud row created");

    cluster.cloud_id = record.id;
    if let Err(e) = store.create_cluster(&cluster).await {
        error!(cloud = %record.name, "Failed to create cluster spec: {}", e);
        rollback(store, &record).await;
        return Err(e);
    }

    for node in nodes.iter_mut() {
        node.cloud_id = record.id;
    }
    if let Err(e) = store.create_nodes(&nodes).await {
        error!(cloud = %record.name, "Failed to create {} nodes: {}", nodes.len(), e);
        rollback(store, &record).await;
        return Err(e);
    }

    info!(
        cloud = %record.name,
        id = record.id,
        nodes = nodes.len(),
        "Self-built cloud created"
    );

    Ok(BuiltCloud {
        record,
        cluster,
        nodes,
    })
}

/// Best-effort removal of a half-built cloud row
async fn rollback(store: &dyn CloudStore, record: &CloudRecord) {
    if let Err(e) = store.delete(record.id).await {
        warn!(
            cloud = %record.name,
            id = record.id,
            "Rollback of cloud row failed: {}",
            e
        );
    }
}
