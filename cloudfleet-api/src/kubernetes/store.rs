//! Storage and cipher seams used by the cloud manager
//!
//! Every call is independently atomic; nothing here spans calls in a
//! transaction.

use async_trait::async_trait;
use cloudfleet_common::CloudStatus;
#[cfg(test)]
use mockall::automock;

use super::error::CloudResult;
use super::types::{ClusterSpecRecord, CloudRecord, NewCloud, NodeRecord};

/// Durable store for clouds, cluster specs and nodes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudStore: Send + Sync {
    /// Insert a cloud and return it with its assigned id
    async fn create(&self, cloud: &NewCloud) -> CloudResult<CloudRecord>;

    async fn get(&self, id: i64) -> CloudResult<CloudRecord>;

    async fn get_by_name(&self, name: &str) -> CloudResult<CloudRecord>;

    /// Conditional on `cloud.resource_version`; bumps it on success
    async fn update(&self, cloud: &CloudRecord) -> CloudResult<CloudRecord>;

    /// Delete a cloud and return the removed row
    async fn delete(&self, id: i64) -> CloudResult<CloudRecord>;

    async fn list(&self) -> CloudResult<Vec<CloudRecord>>;

    /// One page (1-based) plus the total row count
    async fn page_list(&self, page: i64, limit: i64) -> CloudResult<(Vec<CloudRecord>, i64)>;

    async fn set_status(&self, name: &str, status: CloudStatus) -> CloudResult<()>;

    async fn create_cluster(&self, spec: &ClusterSpecRecord) -> CloudResult<()>;

    async fn get_cluster(&self, cloud_id: i64) -> CloudResult<ClusterSpecRecord>;

    async fn delete_cluster(&self, cloud_id: i64) -> CloudResult<()>;

    async fn create_nodes(&self, nodes: &[NodeRecord]) -> CloudResult<()>;

    async fn list_nodes(&self, cloud_id: i64) -> CloudResult<Vec<NodeRecord>>;

    async fn delete_nodes(&self, cloud_id: i64) -> CloudResult<()>;
}

/// Symmetric cipher for credentials at rest
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cipher: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> CloudResult<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8]) -> CloudResult<Vec<u8>>;
}
