//! Cluster provisioning, deployment tracking and health monitoring

pub mod builder;
pub mod deploy;
pub mod health;
