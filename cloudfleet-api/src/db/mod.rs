//! Database layer using SQLite
//!
//! Provides persistent storage for clouds, their cluster specs and nodes.

pub mod migrations;

use async_trait::async_trait;
use cloudfleet_common::{CloudStatus, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::kubernetes::error::CloudResult;
use crate::kubernetes::store::CloudStore;
use crate::kubernetes::types::{ClusterSpecRecord, CloudRecord, NewCloud, NodeRecord};

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Create parent directory if needed
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        cloudfleet_common::Error::System(format!(
                            "Failed to create DB directory: {}",
                            e
                        ))
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| {
                cloudfleet_common::Error::InvalidConfig(format!("Invalid database URL: {}", e))
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                cloudfleet_common::Error::System(format!("Database connection failed: {}", e))
            })?;

        tracing::info!("Database connection established");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| cloudfleet_common::Error::System(format!("Database unreachable: {}", e)))?;
        Ok(())
    }

    /// Number of clouds holding an encrypted credential
    pub async fn count_stored_credentials(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM clouds WHERE length(credential) > 0")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                cloudfleet_common::Error::System(format!("Failed to count credentials: {}", e))
            })
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection closed");
    }
}

#[async_trait]
impl CloudStore for Database {
    async fn create(&self, cloud: &NewCloud) -> CloudResult<CloudRecord> {
        clouds::create_cloud(&self.pool, cloud).await
    }

    async fn get(&self, id: i64) -> CloudResult<CloudRecord> {
        clouds::get_cloud(&self.pool, id).await
    }

    async fn get_by_name(&self, name: &str) -> CloudResult<CloudRecord> {
        clouds::get_cloud_by_name(&self.pool, name).await
    }

    async fn update(&self, cloud: &CloudRecord) -> CloudResult<CloudRecord> {
        clouds::update_cloud(&self.pool, cloud).await
    }

    async fn delete(&self, id: i64) -> CloudResult<CloudRecord> {
        clouds::delete_cloud(&self.pool, id).await
    }

    async fn list(&self) -> CloudResult<Vec<CloudRecord>> {
        clouds::list_clouds(&self.pool).await
    }

    async fn page_list(&self, page: i64, limit: i64) -> CloudResult<(Vec<CloudRecord>, i64)> {
        clouds::page_clouds(&self.pool, page, limit).await
    }

    async fn set_status(&self, name: &str, status: CloudStatus) -> CloudResult<()> {
        clouds::set_status(&self.pool, name, status).await
    }

    async fn create_cluster(&self, spec: &ClusterSpecRecord) -> CloudResult<()> {
        clusters::create_cluster(&self.pool, spec).await
    }

    async fn get_cluster(&self, cloud_id: i64) -> CloudResult<ClusterSpecRecord> {
        clusters::get_cluster(&self.pool, cloud_id).await
    }

    async fn delete_cluster(&self, cloud_id: i64) -> CloudResult<()> {
        clusters::delete_cluster(&self.pool, cloud_id).await
    }

    async fn create_nodes(&self, nodes: &[NodeRecord]) -> CloudResult<()> {
        nodes::create_nodes(&self.pool, nodes).await
    }

    async fn list_nodes(&self, cloud_id: i64) -> CloudResult<Vec<NodeRecord>> {
        nodes::list_nodes(&self.pool, cloud_id).await
    }

    async fn delete_nodes(&self, cloud_id: i64) -> CloudResult<()> {
        nodes::delete_nodes(&self.pool, cloud_id).await
    }
}

/// Cloud database operations
pub mod clouds {
    use super::*;
    use crate::kubernetes::error::CloudError;
    use cloudfleet_common::CloudType;
    use sqlx::sqlite::SqliteRow;
    use sqlx::Row;

    pub async fn create_cloud(pool: &SqlitePool, cloud: &NewCloud) -> CloudResult<CloudRecord> {
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query(
            "INSERT INTO clouds (name, alias_name, status, cloud_type, kube_version, node_number,
                                 credential, description, resource_version, created_at, modified_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
             RETURNING *",
        )
        .bind(&cloud.name)
        .bind(&cloud.alias_name)
        .bind(cloud.status.code())
        .bind(cloud.cloud_type.as_str())
        .bind(&cloud.kube_version)
        .bind(cloud.node_number)
        .bind(&cloud.credential)
        .bind(&cloud.description)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CloudError::Conflict(format!("Cloud '{}' already exists", cloud.name))
            } else {
                CloudError::Persistence(format!("Failed to create cloud {}: {}", cloud.name, e))
            }
        })?;

        Ok(row_to_cloud(&row))
    }

    pub async fn get_cloud(pool: &SqlitePool, id: i64) -> CloudResult<CloudRecord> {
        let row = sqlx::query("SELECT * FROM clouds WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| CloudError::Persistence(format!("Failed to get cloud {}: {}", id, e)))?
            .ok_or_else(|| CloudError::NotFound(id.to_string()))?;

        Ok(row_to_cloud(&row))
    }

    pub async fn get_cloud_by_name(pool: &SqlitePool, name: &str) -> CloudResult<CloudRecord> {
        let row = sqlx::query("SELECT * FROM clouds WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(|e| CloudError::Persistence(format!("Failed to get cloud {}: {}", name, e)))?
            .ok_or_else(|| CloudError::NotFound(name.to_string()))?;

        Ok(row_to_cloud(&row))
    }

    pub async fn update_cloud(pool: &SqlitePool, cloud: &CloudRecord) -> CloudResult<CloudRecord> {
        let row = sqlx::query(
            "UPDATE clouds SET alias_name = ?, status = ?, kube_version = ?, node_number = ?,
                               credential = ?, description = ?,
                               resource_version = resource_version + 1, modified_at = ?
             WHERE id = ? AND resource_version = ?
             RETURNING *",
        )
        .bind(&cloud.alias_name)
        .bind(cloud.status.code())
        .bind(&cloud.kube_version)
        .bind(cloud.node_number)
        .bind(&cloud.credential)
        .bind(&cloud.description)
        .bind(chrono::Utc::now().timestamp())
        .bind(cloud.id)
        .bind(cloud.resource_version)
        .fetch_optional(pool)
        .await
        .map_err(|e| CloudError::Persistence(format!("Failed to update cloud {}: {}", cloud.id, e)))?;

        match row {
            Some(row) => Ok(row_to_cloud(&row)),
            None => {
                // Distinguish a stale token from a missing row
                get_cloud(pool, cloud.id).await?;
                Err(CloudError::Conflict(format!(
                    "Cloud {} was modified concurrently (resource version {} is stale)",
                    cloud.id, cloud.resource_version
                )))
            }
        }
    }

    pub async fn delete_cloud(pool: &SqlitePool, id: i64) -> CloudResult<CloudRecord> {
        let row = sqlx::query("DELETE FROM clouds WHERE id = ? RETURNING *")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| CloudError::Persistence(format!("Failed to delete cloud {}: {}", id, e)))?
            .ok_or_else(|| CloudError::NotFound(id.to_string()))?;

        Ok(row_to_cloud(&row))
    }

    pub async fn list_clouds(pool: &SqlitePool) -> CloudResult<Vec<CloudRecord>> {
        let rows = sqlx::query("SELECT * FROM clouds ORDER BY id")
            .fetch_all(pool)
            .await
            .map_err(|e| CloudError::Persistence(format!("Failed to list clouds: {}", e)))?;

        Ok(rows.iter().map(row_to_cloud).collect())
    }

    pub async fn page_clouds(
        pool: &SqlitePool,
        page: i64,
        limit: i64,
    ) -> CloudResult<(Vec<CloudRecord>, i64)> {
        // Pages past the end saturate to an empty result
        let offset = (page.max(1) - 1).saturating_mul(limit.max(0));

        let rows = sqlx::query("SELECT * FROM clouds ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                CloudError::Persistence(format!(
                    "Failed to page {} limit {} clouds: {}",
                    page, limit, e
                ))
            })?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clouds")
            .fetch_one(pool)
            .await
            .map_err(|e| CloudError::Persistence(format!("Failed to count clouds: {}", e)))?;

        Ok((rows.iter().map(row_to_cloud).collect(), total))
    }

    pub async fn set_status(pool: &SqlitePool, name: &str, status: CloudStatus) -> CloudResult<()> {
        let result = sqlx::query(
            "UPDATE clouds SET status = ?, resource_version = resource_version + 1, modified_at = ?
             WHERE name = ?",
        )
        .bind(status.code())
        .bind(chrono::Utc::now().timestamp())
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| {
            CloudError::Persistence(format!("Failed to set status of cloud {}: {}", name, e))
        })?;

        if result.rows_affected() == 0 {
            return Err(CloudError::NotFound(name.to_string()));
        }

        Ok(())
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
            _ => false,
        }
    }

    fn row_to_cloud(row: &SqliteRow) -> CloudRecord {
        let status_code: i64 = row.get("status");
        let cloud_type: String = row.get("cloud_type");

        CloudRecord {
            id: row.get("id"),
            name: row.get("name"),
            alias_name: row.get("alias_name"),
            status: CloudStatus::from_code(status_code).unwrap_or(CloudStatus::Abnormal),
            cloud_type: CloudType::parse(&cloud_type).unwrap_or_default(),
            kube_version: row.get("kube_version"),
            node_number: row.get("node_number"),
            credential: row.get("credential"),
            description: row.get("description"),
            resource_version: row.get("resource_version"),
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
        }
    }
}

/// Cluster spec database operations
pub mod clusters {
    use super::*;
    use crate::kubernetes::error::CloudError;
    use sqlx::Row;

    pub async fn create_cluster(pool: &SqlitePool, spec: &ClusterSpecRecord) -> CloudResult<()> {
        sqlx::query(
            "INSERT INTO cloud_clusters (cloud_id, api_server, version, runtime, cni,
                                         service_cidr, pod_cidr, proxy_mode)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(spec.cloud_id)
        .bind(&spec.api_server)
        .bind(&spec.version)
        .bind(&spec.runtime)
        .bind(&spec.cni)
        .bind(&spec.service_cidr)
        .bind(&spec.pod_cidr)
        .bind(&spec.proxy_mode)
        .execute(pool)
        .await
        .map_err(|e| {
            CloudError::Persistence(format!(
                "Failed to create cluster for cloud {}: {}",
                spec.cloud_id, e
            ))
        })?;

        Ok(())
    }

    pub async fn get_cluster(pool: &SqlitePool, cloud_id: i64) -> CloudResult<ClusterSpecRecord> {
        let row = sqlx::query("SELECT * FROM cloud_clusters WHERE cloud_id = ?")
            .bind(cloud_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                CloudError::Persistence(format!(
                    "Failed to get cluster for cloud {}: {}",
                    cloud_id, e
                ))
            })?
            .ok_or_else(|| CloudError::NotFound(format!("cluster of cloud {}", cloud_id)))?;

        Ok(ClusterSpecRecord {
            cloud_id: row.get("cloud_id"),
            api_server: row.get("api_server"),
            version: row.get("version"),
            runtime: row.get("runtime"),
            cni: row.get("cni"),
            service_cidr: row.get("service_cidr"),
            pod_cidr: row.get("pod_cidr"),
            proxy_mode: row.get("proxy_mode"),
        })
    }

    pub async fn delete_cluster(pool: &SqlitePool, cloud_id: i64) -> CloudResult<()> {
        sqlx::query("DELETE FROM cloud_clusters WHERE cloud_id = ?")
            .bind(cloud_id)
            .execute(pool)
            .await
            .map_err(|e| {
                CloudError::Persistence(format!(
                    "Failed to delete cluster of cloud {}: {}",
                    cloud_id, e
                ))
            })?;

        Ok(())
    }
}

/// Node database operations
pub mod nodes {
    use super::*;
    use crate::kubernetes::error::CloudError;
    use cloudfleet_common::NodeRole;
    use sqlx::{QueryBuilder, Row, Sqlite};

    /// Insert all nodes with a single statement
    pub async fn create_nodes(pool: &SqlitePool, nodes: &[NodeRecord]) -> CloudResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO cloud_nodes (cloud_id, role, hostname, address, user, password) ",
        );
        builder.push_values(nodes, |mut b, node| {
            b.push_bind(node.cloud_id)
                .push_bind(node.role.as_str())
                .push_bind(&node.hostname)
                .push_bind(&node.address)
                .push_bind(&node.user)
                .push_bind(&node.password);
        });

        builder.build().execute(pool).await.map_err(|e| {
            CloudError::Persistence(format!("Failed to create {} nodes: {}", nodes.len(), e))
        })?;

        Ok(())
    }

    pub async fn list_nodes(pool: &SqlitePool, cloud_id: i64) -> CloudResult<Vec<NodeRecord>> {
        let rows = sqlx::query("SELECT * FROM cloud_nodes WHERE cloud_id = ? ORDER BY id")
            .bind(cloud_id)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                CloudError::Persistence(format!(
                    "Failed to list nodes of cloud {}: {}",
                    cloud_id, e
                ))
            })?;

        Ok(rows
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                NodeRecord {
                    cloud_id: row.get("cloud_id"),
                    role: NodeRole::parse(&role).unwrap_or(NodeRole::Worker),
                    hostname: row.get("hostname"),
                    address: row.get("address"),
                    user: row.get("user"),
                    password: row.get("password"),
                }
            })
            .collect())
    }

    pub async fn delete_nodes(pool: &SqlitePool, cloud_id: i64) -> CloudResult<()> {
        sqlx::query("DELETE FROM cloud_nodes WHERE cloud_id = ?")
            .bind(cloud_id)
            .execute(pool)
            .await
            .map_err(|e| {
                CloudError::Persistence(format!(
                    "Failed to delete nodes of cloud {}: {}",
                    cloud_id, e
                ))
            })?;

        Ok(())
    }
}
