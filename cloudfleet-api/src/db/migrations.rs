//! Database migrations

use cloudfleet_common::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| {
        cloudfleet_common::Error::System(format!("Failed to create migrations table: {}", e))
    })?;

    // Run migrations in order
    run_migration(pool, "001_create_clouds_table", MIGRATION_001_CREATE_CLOUDS).await?;
    run_migration(pool, "002_create_cloud_clusters_table", MIGRATION_002_CREATE_CLUSTERS).await?;
    run_migration(pool, "003_create_cloud_nodes_table", MIGRATION_003_CREATE_NODES).await?;
    run_migration(pool, "004_index_cloud_nodes", MIGRATION_004_INDEX_NODES).await?;

    Ok(())
}

async fn run_migration(pool: &SqlitePool, name: &str, sql: &str) -> Result<()> {
    use sqlx::Row;

    let row = sqlx::query("SELECT COUNT(*) as count FROM migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| cloudfleet_common::Error::System(format!("Migration check failed: {}", e)))?;

    let count: i64 = row.get("count");
    if count > 0 {
        tracing::debug!("Migration {} already applied", name);
        return Ok(());
    }

    tracing::info!("Running migration: {}", name);

    sqlx::query(sql).execute(pool).await.map_err(|e| {
        cloudfleet_common::Error::System(format!("Migration {} failed: {}", name, e))
    })?;

    sqlx::query("INSERT INTO migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| {
            cloudfleet_common::Error::System(format!("Failed to record migration: {}", e))
        })?;

    tracing::info!("Migration {} completed", name);

    Ok(())
}

const MIGRATION_001_CREATE_CLOUDS: &str = "
CREATE TABLE clouds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    alias_name TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    cloud_type TEXT NOT NULL,
    kube_version TEXT NOT NULL DEFAULT '',
    node_number INTEGER NOT NULL DEFAULT 0,
    credential BLOB NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    resource_version INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL
);
";

const MIGRATION_002_CREATE_CLUSTERS: &str = "
CREATE TABLE cloud_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cloud_id INTEGER NOT NULL UNIQUE,
    api_server TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '',
    runtime TEXT NOT NULL DEFAULT '',
    cni TEXT NOT NULL DEFAULT '',
    service_cidr TEXT NOT NULL DEFAULT '',
    pod_cidr TEXT NOT NULL DEFAULT '',
    proxy_mode TEXT NOT NULL DEFAULT ''
);
";

const MIGRATION_003_CREATE_NODES: &str = "
CREATE TABLE cloud_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cloud_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    hostname TEXT NOT NULL,
    address TEXT NOT NULL,
    user TEXT NOT NULL,
    password TEXT NOT NULL DEFAULT ''
);
";

const MIGRATION_004_INDEX_NODES: &str =
    "CREATE INDEX idx_cloud_nodes_cloud_id ON cloud_nodes (cloud_id);";
