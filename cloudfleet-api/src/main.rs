//! cloudfleet API server

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use cloudfleet_api::config::FleetConfig;
use cloudfleet_api::db::Database;
use cloudfleet_api::encryption::EncryptionManager;
use cloudfleet_api::kubernetes::client::KubeClientFactory;
use cloudfleet_api::kubernetes::registry::ClientRegistry;
use cloudfleet_api::kubernetes::{CloudManager, ManagerSettings};
use cloudfleet_api::routes;
use cloudfleet_api::shutdown::{
    CleanupRunner, DatabaseCleanup, RegistryCleanup, ShutdownCoordinator, TaskShutdown,
};
use cloudfleet_api::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--print-config") {
        println!("{}", FleetConfig::generate_sample());
        return Ok(());
    }

    let config = FleetConfig::load().context("Invalid configuration")?;
    let _log_guard = config
        .logging
        .init()
        .context("Failed to initialize logging")?;
    info!("Configuration loaded successfully");

    let database = Arc::new(
        Database::new(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to database")?,
    );
    database
        .migrate()
        .await
        .context("Failed to run migrations")?;

    let stored = database
        .count_stored_credentials()
        .await
        .context("Failed to inspect stored credentials")?;
    config
        .encryption
        .check_stored_credentials(stored)
        .context("Refusing to start with a generated encryption key")?;

    let encryption = Arc::new(EncryptionManager::new());
    encryption
        .initialize(&config.encryption)
        .await
        .context("Failed to initialize encryption")?;

    let registry = ClientRegistry::new();
    let manager = Arc::new(
        CloudManager::new(
            database.clone(),
            encryption,
            Arc::new(KubeClientFactory),
            registry.clone(),
        )
        .with_settings(ManagerSettings::from_config(&config)),
    );

    let coordinator = ShutdownCoordinator::new();
    let mut tasks = TaskShutdown::new();

    let monitor = manager
        .load(coordinator.subscribe())
        .await
        .context("Failed to load clouds")?;
    tasks.register("health_monitor", monitor);

    let signals = coordinator.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    let state = Arc::new(AppState::new(manager, database.clone()));
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("cloudfleet API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(coordinator.signal())
        .await?;

    info!("Server stopped, running cleanup...");
    coordinator.shutdown();
    tasks.join_all(coordinator.timeout()).await;

    let mut cleanup = CleanupRunner::new();
    cleanup.add(RegistryCleanup::new(registry));
    cleanup.add(DatabaseCleanup::new(database));
    cleanup.run_all(coordinator.timeout()).await;

    info!("Cleanup complete, exiting");

    Ok(())
}
