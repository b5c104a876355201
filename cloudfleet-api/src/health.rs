//! Service health reporting
//!
//! Aggregates the state of the database and the cloud client registry into
//! the response of the health endpoint.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::db::Database;
use crate::kubernetes::registry::ClientRegistry;

/// Overall system health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Some components degraded but functional
    Degraded,
    Unhealthy,
}

/// Individual component health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

/// Health endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: i64,
    pub components: Vec<ComponentHealth>,
}

/// Health checker for system components
pub struct HealthChecker {
    start_time: Instant,
    version: String,
}

impl HealthChecker {
    pub fn new(version: &str) -> Self {
        Self {
            start_time: Instant::now(),
            version: version.to_string(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if database is reachable
    pub async fn check_database(&self, db: &Database) -> ComponentHealth {
        let start = Instant::now();

        let (status, message) = match db.health_check().await {
            Ok(()) => (HealthStatus::Healthy, "Connected".to_string()),
            Err(e) => (HealthStatus::Unhealthy, format!("Connection failed: {}", e)),
        };

        ComponentHealth {
            name: "database".to_string(),
            status,
            message: Some(message),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    /// Report how many clouds have a live client
    pub async fn check_registry(&self, registry: &ClientRegistry) -> ComponentHealth {
        let connected = registry.len().await;

        ComponentHealth {
            name: "client_registry".to_string(),
            status: HealthStatus::Healthy,
            message: Some(format!("{} cloud(s) connected", connected)),
            latency_ms: None,
        }
    }

    /// Aggregate component health into overall status
    fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
        if components
            .iter()
            .any(|c| c.status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if components.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn build_response(&self, components: Vec<ComponentHealth>) -> HealthResponse {
        HealthResponse {
            status: Self::aggregate_status(&components),
            version: self.version.clone(),
            uptime_seconds: self.uptime_seconds(),
            timestamp: chrono::Utc::now().timestamp(),
            components,
        }
    }
}
