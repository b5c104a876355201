//! Application State
//!
//! Shared state for the cloudfleet API server

use std::sync::Arc;

use crate::db::Database;
use crate::health::HealthChecker;
use crate::kubernetes::CloudManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cloud_manager: Arc<CloudManager>,
    pub database: Arc<Database>,
    pub health_checker: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(cloud_manager: Arc<CloudManager>, database: Arc<Database>) -> Self {
        Self {
            cloud_manager,
            database,
            health_checker: Arc::new(HealthChecker::new(env!("CARGO_PKG_VERSION"))),
        }
    }
}
