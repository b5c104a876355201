//! Graceful shutdown handling
//!
//! Provides coordinated shutdown of the control plane with:
//! - Signal handling (SIGTERM, SIGINT)
//! - Background task draining (the health monitor)
//! - Cleanup of the registry and database pool before exit

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::kubernetes::registry::ClientRegistry;

/// Shutdown coordinator for graceful termination
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    is_shutting_down: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with default 30s timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            shutdown_tx,
            shutdown_rx,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Get a receiver for shutdown signals
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate graceful shutdown
    pub fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for a termination signal from the OS, then trigger shutdown
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                    }
                }
                _ => {
                    error!("Failed to register signal handlers, falling back to Ctrl+C");
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl+C: {}", e);
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C");
        }

        self.shutdown();
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Future resolving once shutdown starts, for axum's graceful shutdown
    pub fn signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();

        async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks background tasks that must stop before exit
pub struct TaskShutdown {
    tasks: Vec<(&'static str, tokio::task::JoinHandle<()>)>,
}

impl TaskShutdown {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Register a background task for shutdown
    pub fn register(&mut self, name: &'static str, handle: tokio::task::JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task to finish on its own, aborting those that overrun `timeout`
    pub async fn join_all(&mut self, timeout: Duration) {
        info!("Stopping {} background tasks...", self.tasks.len());

        for (name, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {
                    info!("Task '{}' stopped gracefully", name);
                }
                Ok(Err(e)) if e.is_cancelled() => {
                    info!("Task '{}' cancelled", name);
                }
                Ok(Err(e)) => {
                    warn!("Task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    warn!("Task '{}' did not stop within timeout, aborting", name);
                    handle.abort();
                }
            }
        }
    }
}

impl Default for TaskShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cleanup operations to run during shutdown
pub struct CleanupRunner {
    operations: Vec<Box<dyn CleanupOperation + Send + Sync>>,
}

impl CleanupRunner {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    pub fn add<T: CleanupOperation + Send + Sync + 'static>(&mut self, op: T) {
        self.operations.push(Box::new(op));
    }

    /// Run all cleanup operations within the given deadline
    pub async fn run_all(&self, deadline: Duration) {
        let run = async {
            for (i, op) in self.operations.iter().enumerate() {
                info!(
                    "Running cleanup operation {}/{}: {}",
                    i + 1,
                    self.operations.len(),
                    op.name()
                );

                if let Err(e) = op.cleanup().await {
                    error!("Cleanup operation '{}' failed: {}", op.name(), e);
                }
            }
        };

        if timeout(deadline, run).await.is_err() {
            warn!("Cleanup did not complete within {:?}, forcing exit", deadline);
        }
    }
}

impl Default for CleanupRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for cleanup operations during shutdown
#[async_trait::async_trait]
pub trait CleanupOperation {
    fn name(&self) -> &'static str;

    async fn cleanup(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Closes the database pool
pub struct DatabaseCleanup {
    db: Arc<crate::db::Database>,
}

impl DatabaseCleanup {
    pub fn new(db: Arc<crate::db::Database>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl CleanupOperation for DatabaseCleanup {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn cleanup(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Closing database connections...");
        self.db.close().await;
        Ok(())
    }
}

/// Drops every live cluster client
pub struct RegistryCleanup {
    registry: ClientRegistry,
}

impl RegistryCleanup {
    pub fn new(registry: ClientRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl CleanupOperation for RegistryCleanup {
    fn name(&self) -> &'static str {
        "client_registry"
    }

    async fn cleanup(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Releasing {} cluster clients...", self.registry.len().await);
        self.registry.clear().await;
        Ok(())
    }
}
