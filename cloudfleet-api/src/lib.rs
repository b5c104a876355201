//! cloudfleet API Library
//!
//! Control plane for a fleet of Kubernetes clusters, exposed for the server
//! binary and for integration tests.

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod shutdown;

// Application state
pub mod health;
pub mod routes;
pub mod state;
pub use state::AppState;

// Storage
pub mod db;
pub mod encryption;

// Cloud lifecycle
pub mod kubernetes;
