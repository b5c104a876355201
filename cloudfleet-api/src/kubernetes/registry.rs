//! Live client registry
//!
//! In-memory map from cloud name to client handle. Rebuilt by the manager's
//! load pass at startup; never persisted.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::client::ClientHandle;

/// Concurrency-safe mapping of cloud name to live client
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, replacing any existing entry for `name`
    pub async fn add(&self, name: &str, client: ClientHandle) {
        self.clients.write().await.insert(name.to_string(), client);
    }

    pub async fn get(&self, name: &str) -> Option<ClientHandle> {
        self.clients.read().await.get(name).cloned()
    }

    /// Remove the entry for `name`; absent names are ignored
    pub async fn delete(&self, name: &str) -> Option<ClientHandle> {
        self.clients.write().await.remove(name)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.clients.read().await.contains_key(name)
    }

    /// Point-in-time copy; later adds and deletes are not reflected in it
    pub async fn list(&self) -> HashMap<String, ClientHandle> {
        self.clients.read().await.clone()
    }

    pub async fn clear(&self) {
        self.clients.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").finish_non_exhaustive()
    }
}
