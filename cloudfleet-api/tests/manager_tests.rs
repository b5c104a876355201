//! Cloud manager tests
//! Drive the lifecycle over the real SQLite store and cipher with stub clusters

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

use cloudfleet_api::kubernetes::client::{ClientFactory, ClientHandle, ClusterClient};
use cloudfleet_api::kubernetes::cluster::deploy::{ClusterDeployer, DeployState};
use cloudfleet_api::kubernetes::error::{CloudError, CloudResult};
use cloudfleet_api::kubernetes::store::CloudStore;
use cloudfleet_api::kubernetes::types::{
    BuildCloudRequest, ClusterSpecRecord, CloudRecord, CreateCloudRequest,
    CreateNamespaceRequest, KubernetesSpec, NamespaceInfo, NodeList, NodeRecord, NodeSpec,
    UpdateCloudRequest,
};
use cloudfleet_api::kubernetes::registry::ClientRegistry;
use cloudfleet_api::kubernetes::{CloudManager, ManagerSettings};
use cloudfleet_common::{CloudList, CloudStatus, CloudType, PageOptions};

use common::{StubCluster, StubFactory, EDGE_KUBECONFIG, LAB_KUBECONFIG};

fn create_request(name: &str, kubeconfig: &str) -> CreateCloudRequest {
    CreateCloudRequest {
        name: name.to_string(),
        kubeconfig: kubeconfig.to_string(),
        description: Some("integration".to_string()),
    }
}

fn build_request(immediate: bool) -> BuildCloudRequest {
    let machine = |hostname: &str, address: &str| NodeSpec {
        hostname: hostname.to_string(),
        address: address.to_string(),
        user: "root".to_string(),
        password: "secret".to_string(),
    };

    BuildCloudRequest {
        alias_name: "lab".to_string(),
        description: None,
        immediate,
        kubernetes: KubernetesSpec {
            version: "v1.30.0".to_string(),
            masters: vec![machine("m1", "10.0.0.1")],
            nodes: vec![machine("w1", "10.0.0.2"), machine("w2", "10.0.0.3")],
            ..Default::default()
        },
    }
}

/// Deployer that hands back a fixed kubeconfig
struct FixedDeployer {
    kubeconfig: &'static str,
}

#[async_trait]
impl ClusterDeployer for FixedDeployer {
    async fn deploy(
        &self,
        _cloud: &CloudRecord,
        _spec: &ClusterSpecRecord,
        nodes: &[NodeRecord],
    ) -> CloudResult<Option<Vec<u8>>> {
        assert_eq!(nodes.len(), 3);
        Ok(Some(self.kubeconfig.as_bytes().to_vec()))
    }
}

/// Deployer that never finishes and counts its invocations
#[derive(Default)]
struct StuckDeployer {
    calls: AtomicUsize,
}

#[async_trait]
impl ClusterDeployer for StuckDeployer {
    async fn deploy(
        &self,
        _cloud: &CloudRecord,
        _spec: &ClusterSpecRecord,
        _nodes: &[NodeRecord],
    ) -> CloudResult<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::pending::<()>().await;
        Ok(None)
    }
}

/// Cluster whose namespace creation waits for the test to release it
struct GatedCluster {
    inner: Arc<StubCluster>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ClusterClient for GatedCluster {
    fn api_server(&self) -> String {
        self.inner.api_server()
    }

    async fn list_nodes(&self, limit: u32) -> CloudResult<NodeList> {
        self.inner.list_nodes(limit).await
    }

    async fn probe(&self, timeout: Duration) -> CloudResult<()> {
        self.inner.probe(timeout).await
    }

    async fn list_namespaces(&self) -> CloudResult<Vec<NamespaceInfo>> {
        self.inner.list_namespaces().await
    }

    async fn get_namespace(&self, name: &str) -> CloudResult<NamespaceInfo> {
        self.inner.get_namespace(name).await
    }

    async fn create_namespace(
        &self,
        request: &CreateNamespaceRequest,
    ) -> CloudResult<NamespaceInfo> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create_namespace(request).await
    }

    async fn delete_namespace(&self, name: &str) -> CloudResult<()> {
        self.inner.delete_namespace(name).await
    }
}

struct GatedFactory(Arc<GatedCluster>);

#[async_trait]
impl ClientFactory for GatedFactory {
    async fn connect(&self, _kubeconfig: &[u8]) -> CloudResult<ClientHandle> {
        let client: ClientHandle = self.0.clone();
        Ok(client)
    }
}

async fn wait_until_finished(
    manager: &cloudfleet_api::kubernetes::CloudManager,
    id: i64,
) -> DeployState {
    for _ in 0..200 {
        match manager.deploy_state(id).await {
            Some(state) if state.is_finished() => return state,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("deployment of cloud {} did not finish", id);
}

#[tokio::test]
async fn test_cloud_lifecycle() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2", "v1.30.2", "v1.30.1"]);
    let manager = common::manager_with(
        db.clone(),
        StubFactory::default().with(LAB_KUBECONFIG, lab.clone()),
    )
    .await;

    let cloud = manager
        .create(create_request("lab", LAB_KUBECONFIG))
        .await
        .unwrap();
    assert!(cloud.name.starts_with("cld-"));
    assert_eq!(cloud.alias_name, "lab");
    assert_eq!(cloud.status, CloudStatus::Normal);
    assert_eq!(cloud.kube_version, "v1.30.2");
    assert_eq!(cloud.node_number, 3);
    assert!(lab.has_namespace("cloudfleet-system"));
    assert!(manager.registry().contains(&cloud.name).await);

    // Credential is stored sealed
    let stored = db.get(cloud.id).await.unwrap();
    assert!(!stored.credential.is_empty());
    assert_ne!(stored.credential, LAB_KUBECONFIG.as_bytes());

    let updated = manager
        .update(
            cloud.id,
            UpdateCloudRequest {
                resource_version: cloud.resource_version,
                description: Some("renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.description, "renamed");

    let stale = manager
        .update(
            cloud.id,
            UpdateCloudRequest {
                resource_version: cloud.resource_version,
                alias_name: Some("late".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(stale, Err(CloudError::Conflict(_))));

    let removed = manager.delete(cloud.id).await.unwrap();
    assert_eq!(removed.id, cloud.id);
    assert!(!manager.registry().contains(&cloud.name).await);
    assert!(matches!(manager.get(cloud.id).await, Err(CloudError::NotFound(_))));
}

#[tokio::test]
async fn test_create_rejects_unknown_kubeconfig() {
    let db = common::memory_db().await;
    let manager = common::manager_with(db.clone(), StubFactory::default()).await;

    let err = manager
        .create(create_request("lab", LAB_KUBECONFIG))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Connectivity(_)));
    assert!(db.list().await.unwrap().is_empty());
    assert!(manager.registry().is_empty().await);
}

#[tokio::test]
async fn test_system_namespace_may_already_exist() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2"]);
    let manager = common::manager_with(
        db,
        StubFactory::default().with(LAB_KUBECONFIG, lab.clone()),
    )
    .await;

    // Same cluster onboarded twice under different names
    let first = manager.create(create_request("a", LAB_KUBECONFIG)).await.unwrap();
    let second = manager.create(create_request("b", LAB_KUBECONFIG)).await.unwrap();
    assert_ne!(first.name, second.name);
    assert_eq!(manager.registry().len().await, 2);
}

#[tokio::test]
async fn test_list_paged_and_unpaged() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2"]);
    let manager = common::manager_with(
        db,
        StubFactory::default().with(LAB_KUBECONFIG, lab),
    )
    .await
    .with_settings(ManagerSettings {
        default_page_size: 2,
        ..Default::default()
    });

    for alias in ["a", "b", "c"] {
        manager.create(create_request(alias, LAB_KUBECONFIG)).await.unwrap();
    }

    match manager.list(PageOptions { page: 0, limit: 0 }).await.unwrap() {
        CloudList::All(clouds) => assert_eq!(clouds.len(), 3),
        other => panic!("expected unpaged listing, got {:?}", other),
    }

    match manager.list(PageOptions { page: 2, limit: 0 }).await.unwrap() {
        CloudList::Page(page) => {
            assert_eq!(page.total, 3);
            assert_eq!(page.data.len(), 1);
            assert_eq!(page.data[0].alias_name, "c");
        }
        other => panic!("expected a page, got {:?}", other),
    }

    match manager.list(PageOptions { page: i64::MAX, limit: 10 }).await.unwrap() {
        CloudList::Page(page) => {
            assert!(page.data.is_empty());
            assert_eq!(page.total, 3);
        }
        other => panic!("expected a page, got {:?}", other),
    }
}

#[tokio::test]
async fn test_namespace_operations() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2"]);
    let manager = common::manager_with(
        db,
        StubFactory::default().with(LAB_KUBECONFIG, lab.clone()),
    )
    .await;
    let cloud = manager.create(create_request("lab", LAB_KUBECONFIG)).await.unwrap();

    let created = manager
        .create_namespace(&cloud.name, &CreateNamespaceRequest::named("team-a"))
        .await
        .unwrap();
    assert_eq!(created.name, "team-a");

    let names: Vec<_> = manager
        .list_namespaces(&cloud.name)
        .await
        .unwrap()
        .into_iter()
        .map(|ns| ns.name)
        .collect();
    assert_eq!(names, vec!["cloudfleet-system", "team-a"]);

    assert_eq!(
        manager.get_namespace(&cloud.name, "team-a").await.unwrap().status,
        "Active"
    );

    manager.delete_namespace(&cloud.name, "team-a").await.unwrap();
    assert!(!lab.has_namespace("team-a"));

    let err = manager.list_namespaces("cld-missing").await.unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

#[tokio::test]
async fn test_update_replaces_credential() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2"]);
    let edge = StubCluster::new("https://edge:6443", &["v1.31.0", "v1.31.0"]);
    let manager = common::manager_with(
        db.clone(),
        StubFactory::default()
            .with(LAB_KUBECONFIG, lab)
            .with(EDGE_KUBECONFIG, edge.clone()),
    )
    .await;

    let cloud = manager.create(create_request("lab", LAB_KUBECONFIG)).await.unwrap();
    db.set_status(&cloud.name, CloudStatus::Abnormal).await.unwrap();
    let current = manager.get(cloud.id).await.unwrap();

    let updated = manager
        .update(
            cloud.id,
            UpdateCloudRequest {
                resource_version: current.resource_version,
                kubeconfig: Some(EDGE_KUBECONFIG.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, CloudStatus::Normal);
    assert_eq!(updated.kube_version, "v1.31.0");
    assert_eq!(updated.node_number, 2);
    assert!(edge.has_namespace("cloudfleet-system"));

    let client = manager.registry().get(&cloud.name).await.unwrap();
    assert_eq!(client.api_server(), "https://edge:6443");
}

#[tokio::test]
async fn test_load_skips_unreadable_credentials() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2"]);
    let factory = || StubFactory::default().with(LAB_KUBECONFIG, lab.clone());

    let first = common::manager_with(db.clone(), factory()).await;
    let cloud = first.create(create_request("lab", LAB_KUBECONFIG)).await.unwrap();

    // A fresh process with the same database but a different key
    let restarted = common::manager_with(db.clone(), factory())
        .await
        .with_settings(ManagerSettings {
            monitor_interval: Duration::from_millis(20),
            ..Default::default()
        });
    let (_tx, rx) = watch::channel(false);
    let monitor = restarted.load(rx).await.unwrap();
    monitor.abort();

    // The credential was sealed with another key; the row is left as it was
    assert!(restarted.registry().is_empty().await);
    assert_eq!(db.get(cloud.id).await.unwrap().status, CloudStatus::Normal);
    assert!(matches!(
        restarted.list_namespaces(&cloud.name).await,
        Err(CloudError::ClusterNotConnected(_))
    ));

    // A fresh kubeconfig reconnects it
    let current = restarted.get(cloud.id).await.unwrap();
    restarted
        .update(
            cloud.id,
            UpdateCloudRequest {
                resource_version: current.resource_version,
                kubeconfig: Some(LAB_KUBECONFIG.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(restarted.registry().contains(&cloud.name).await);
}

#[tokio::test]
async fn test_health_monitor_tracks_probe_results() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2"]);
    let manager = common::manager_with(
        db.clone(),
        StubFactory::default().with(LAB_KUBECONFIG, lab.clone()),
    )
    .await
    .with_settings(ManagerSettings {
        monitor_interval: Duration::from_millis(20),
        ..Default::default()
    });

    let cloud = manager.create(create_request("lab", LAB_KUBECONFIG)).await.unwrap();

    let (tx, rx) = watch::channel(false);
    let monitor = manager.load(rx).await.unwrap();
    assert!(manager.registry().contains(&cloud.name).await);

    lab.set_healthy(false);
    let mut status = CloudStatus::Normal;
    for _ in 0..100 {
        status = db.get(cloud.id).await.unwrap().status;
        if status == CloudStatus::Abnormal {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, CloudStatus::Abnormal);

    lab.set_healthy(true);
    for _ in 0..100 {
        status = db.get(cloud.id).await.unwrap().status;
        if status == CloudStatus::Normal {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, CloudStatus::Normal);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), monitor)
        .await
        .expect("monitor stops on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_build_and_deploy() {
    let db = common::memory_db().await;
    let built_cluster = StubCluster::new("https://10.0.0.1:6443", &["v1.30.0", "v1.30.0", "v1.30.0"]);
    let manager = common::manager_with(
        db.clone(),
        StubFactory::default().with(EDGE_KUBECONFIG, built_cluster.clone()),
    )
    .await
    .with_deployer(Arc::new(FixedDeployer {
        kubeconfig: EDGE_KUBECONFIG,
    }));

    let cloud = manager.build(build_request(true)).await.unwrap();
    assert!(cloud.name.starts_with("bld-"));
    assert_eq!(cloud.cloud_type, CloudType::SelfBuilt);
    assert_eq!(cloud.status, CloudStatus::Initializing);
    assert_eq!(db.list_nodes(cloud.id).await.unwrap().len(), 3);

    assert_eq!(wait_until_finished(&manager, cloud.id).await, DeployState::Succeeded);

    let deployed = manager.get(cloud.id).await.unwrap();
    assert_eq!(deployed.status, CloudStatus::Normal);
    assert_eq!(deployed.node_number, 3);
    assert!(manager.registry().contains(&cloud.name).await);
    assert!(built_cluster.has_namespace("cloudfleet-system"));

    manager.delete(cloud.id).await.unwrap();
    assert!(db.list_nodes(cloud.id).await.unwrap().is_empty());
    assert!(db.get_cluster(cloud.id).await.is_err());
    assert!(manager.deploy_state(cloud.id).await.is_none());
}

#[tokio::test]
async fn test_unconfigured_deployer_marks_abnormal() {
    let db = common::memory_db().await;
    let manager = common::manager_with(db.clone(), StubFactory::default()).await;

    let cloud = manager.build(build_request(false)).await.unwrap();
    assert!(manager.deploy_state(cloud.id).await.is_none());

    assert_eq!(manager.deploy(cloud.id).await.unwrap(), DeployState::Running);
    match wait_until_finished(&manager, cloud.id).await {
        DeployState::Failed(reason) => assert!(reason.contains("not configured")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(manager.get(cloud.id).await.unwrap().status, CloudStatus::Abnormal);
}

#[tokio::test]
async fn test_cancel_running_deploy() {
    let db = common::memory_db().await;
    let manager = common::manager_with(db, StubFactory::default())
        .await
        .with_deployer(Arc::new(StuckDeployer::default()));

    let cloud = manager.build(build_request(true)).await.unwrap();
    assert_eq!(manager.deploy_state(cloud.id).await, Some(DeployState::Running));
    assert!(matches!(
        manager.deploy(cloud.id).await,
        Err(CloudError::Conflict(_))
    ));

    manager.cancel_deploy(cloud.id).await.unwrap();
    assert_eq!(wait_until_finished(&manager, cloud.id).await, DeployState::Cancelled);
    assert_eq!(manager.get(cloud.id).await.unwrap().status, CloudStatus::Initializing);

    assert!(matches!(
        manager.cancel_deploy(cloud.id).await,
        Err(CloudError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_ping() {
    let db = common::memory_db().await;
    let lab = StubCluster::new("https://lab:6443", &["v1.30.2"]);
    let manager = common::manager_with(
        db,
        StubFactory::default().with(LAB_KUBECONFIG, lab),
    )
    .await;

    // kube-system is absent on the stub; ping still succeeds
    manager.ping(LAB_KUBECONFIG.as_bytes()).await.unwrap();

    let err = manager.ping(EDGE_KUBECONFIG.as_bytes()).await.unwrap_err();
    assert!(matches!(err, CloudError::Connectivity(_)));

    let err = manager.ping(b"").await.unwrap_err();
    assert!(matches!(err, CloudError::Validation(_)));
}

#[tokio::test]
async fn test_concurrent_deploys_start_once() {
    let db = common::memory_db().await;
    let deployer = Arc::new(StuckDeployer::default());
    let manager = common::manager_with(db, StubFactory::default())
        .await
        .with_deployer(deployer.clone());

    let cloud = manager.build(build_request(false)).await.unwrap();
    let (first, second) = tokio::join!(manager.deploy(cloud.id), manager.deploy(cloud.id));

    let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1);
    assert!(matches!(
        [first, second].into_iter().find(Result::is_err),
        Some(Err(CloudError::Conflict(_)))
    ));

    for _ in 0..50 {
        if deployer.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(deployer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_during_adoption_keeps_cloud_registered() {
    let db = common::memory_db().await;
    let gated = Arc::new(GatedCluster {
        inner: StubCluster::new("https://10.0.0.1:6443", &["v1.30.0", "v1.30.0", "v1.30.0"]),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let manager = CloudManager::new(
        db.clone(),
        common::cipher().await,
        Arc::new(GatedFactory(gated.clone())),
        ClientRegistry::new(),
    )
    .with_deployer(Arc::new(FixedDeployer {
        kubeconfig: EDGE_KUBECONFIG,
    }));

    let cloud = manager.build(build_request(true)).await.unwrap();

    // The deployer has returned and the credential is being adopted
    tokio::time::timeout(Duration::from_secs(2), gated.entered.notified())
        .await
        .expect("adoption reached the system namespace");
    manager.cancel_deploy(cloud.id).await.unwrap();
    gated.release.notify_one();

    let mut state = None;
    for _ in 0..200 {
        state = manager.deploy_state(cloud.id).await;
        if state == Some(DeployState::Succeeded) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(state, Some(DeployState::Succeeded));
    assert!(manager.registry().contains(&cloud.name).await);
    assert_eq!(db.get(cloud.id).await.unwrap().status, CloudStatus::Normal);
}
