//! Credential encryption
//!
//! AES-256-GCM encryption of kubeconfig blobs before they reach the database.

use async_trait::async_trait;
use cloudfleet_common::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::kubernetes::error::{CloudError, CloudResult};
use crate::kubernetes::store::Cipher;

/// AES-256-GCM encryption key size in bytes
const KEY_SIZE: usize = 32;
/// Nonce size for AES-256-GCM
const NONCE_SIZE: usize = 12;
/// Authentication tag size for AES-256-GCM
const TAG_SIZE: usize = 16;

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Master encryption key (hex-encoded)
    pub master_key: Option<String>,
    /// Path to key file
    pub key_file: Option<String>,
    /// Auto-generate key if not provided
    pub auto_generate: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            key_file: None,
            auto_generate: true,
        }
    }
}

impl EncryptionConfig {
    /// Whether the configured key survives a restart
    pub fn has_persistent_key(&self) -> bool {
        self.master_key.is_some() || self.key_file.is_some()
    }

    /// Refuse a generated key while credentials sealed with an earlier key exist
    pub fn check_stored_credentials(&self, stored: i64) -> Result<()> {
        if stored > 0 && !self.has_persistent_key() {
            return Err(cloudfleet_common::Error::InvalidConfig(format!(
                "{} stored cloud credential(s) need the key they were sealed with; set encryption.master_key or encryption.key_file",
                stored
            )));
        }
        Ok(())
    }
}

/// Encryption manager for cloud credentials
pub struct EncryptionManager {
    key: Arc<RwLock<Option<[u8; KEY_SIZE]>>>,
}

impl EncryptionManager {
    /// Create a new encryption manager
    pub fn new() -> Self {
        Self {
            key: Arc::new(RwLock::new(None)),
        }
    }

    /// Initialize with configuration
    pub async fn initialize(&self, config: &EncryptionConfig) -> Result<()> {
        let key = if let Some(ref hex_key) = config.master_key {
            Self::decode_hex_key(hex_key)?
        } else if let Some(ref key_file) = config.key_file {
            Self::load_key_from_file(key_file).await?
        } else if config.auto_generate {
            tracing::warn!(
                "No encryption key configured, generated an ephemeral key; stored credentials will not survive a restart"
            );
            Self::generate_key()
        } else {
            return Err(cloudfleet_common::Error::InvalidConfig(
                "No encryption key configured".to_string(),
            ));
        };

        *self.key.write().await = Some(key);

        tracing::info!("Encryption manager initialized");
        Ok(())
    }

    /// Check if encryption is available
    pub async fn is_available(&self) -> bool {
        self.key.read().await.is_some()
    }

    /// Generate a new encryption key
    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill(&mut key);
        key
    }

    /// Generate a new key and return as hex string
    pub fn generate_key_hex() -> String {
        hex::encode(Self::generate_key())
    }

    async fn get_key(&self) -> CloudResult<[u8; KEY_SIZE]> {
        self.key
            .read()
            .await
            .ok_or_else(|| CloudError::Encryption("Encryption not initialized".to_string()))
    }

    /// Decode a hex-encoded key
    fn decode_hex_key(hex_key: &str) -> Result<[u8; KEY_SIZE]> {
        let bytes = hex::decode(hex_key).map_err(|e| {
            cloudfleet_common::Error::InvalidConfig(format!("Invalid hex key: {}", e))
        })?;

        if bytes.len() != KEY_SIZE {
            return Err(cloudfleet_common::Error::InvalidConfig(format!(
                "Key must be {} bytes (got {})",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    async fn load_key_from_file(path: &str) -> Result<[u8; KEY_SIZE]> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            cloudfleet_common::Error::System(format!("Failed to read key file: {}", e))
        })?;

        Self::decode_hex_key(contents.trim())
    }

    /// Encrypt with a specific key; the random nonce is prepended
    fn encrypt_with_key(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CloudResult<Vec<u8>> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CloudError::Encryption(format!("Failed to create cipher: {}", e)))?;

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CloudError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    fn decrypt_with_key(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> CloudResult<Vec<u8>> {
        use aes_gcm::{
            aead::{Aead, KeyInit},
            Aes256Gcm, Nonce,
        };

        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CloudError::Encryption("Ciphertext too short".to_string()));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        let encrypted_data = &ciphertext[NONCE_SIZE..];

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CloudError::Encryption(format!("Failed to create cipher: {}", e)))?;

        cipher
            .decrypt(nonce, encrypted_data)
            .map_err(|e| CloudError::Encryption(format!("Decryption failed: {}", e)))
    }
}

impl Default for EncryptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cipher for EncryptionManager {
    async fn encrypt(&self, plaintext: &[u8]) -> CloudResult<Vec<u8>> {
        let key = self.get_key().await?;
        Self::encrypt_with_key(&key, plaintext)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> CloudResult<Vec<u8>> {
        let key = self.get_key().await?;
        Self::decrypt_with_key(&key, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager_with_key(hex_key: String) -> EncryptionManager {
        let manager = EncryptionManager::new();
        manager
            .initialize(&EncryptionConfig {
                master_key: Some(hex_key),
                key_file: None,
                auto_generate: false,
            })
            .await
            .unwrap();
        manager
    }

    #[test]
    fn test_key_hex_generation() {
        let hex_key = EncryptionManager::generate_key_hex();
        assert_eq!(hex_key.len(), KEY_SIZE * 2);
        assert!(hex::decode(&hex_key).is_ok());
        assert_ne!(hex_key, EncryptionManager::generate_key_hex());
    }

    #[tokio::test]
    async fn test_kubeconfig_roundtrip() {
        let manager = manager_with_key(EncryptionManager::generate_key_hex()).await;

        let plaintext = b"apiVersion: v1\nkind: Config\n";
        let ciphertext = manager.encrypt(plaintext).await.unwrap();
        assert_ne!(ciphertext.as_slice(), plaintext.as_slice());

        let decrypted = manager.decrypt(&ciphertext).await.unwrap();
        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[tokio::test]
    async fn test_nonce_varies() {
        let manager = manager_with_key(EncryptionManager::generate_key_hex()).await;
        let ct1 = manager.encrypt(b"same").await.unwrap();
        let ct2 = manager.encrypt(b"same").await.unwrap();
        assert_ne!(ct1, ct2);
    }

    #[tokio::test]
    async fn test_uninitialized_manager_refuses() {
        let manager = EncryptionManager::new();
        assert!(!manager.is_available().await);
        assert!(matches!(
            manager.encrypt(b"data").await,
            Err(CloudError::Encryption(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let manager1 = manager_with_key(EncryptionManager::generate_key_hex()).await;
        let manager2 = manager_with_key(EncryptionManager::generate_key_hex()).await;

        let encrypted = manager1.encrypt(b"secret").await.unwrap();
        assert!(manager2.decrypt(&encrypted).await.is_err());
        assert!(manager2.decrypt(&[0u8; 10]).await.is_err());
    }

    #[tokio::test]
    async fn test_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloudfleet.key");
        std::fs::write(&path, format!("{}\n", EncryptionManager::generate_key_hex())).unwrap();

        let manager = EncryptionManager::new();
        manager
            .initialize(&EncryptionConfig {
                master_key: None,
                key_file: Some(path.to_string_lossy().to_string()),
                auto_generate: false,
            })
            .await
            .unwrap();
        assert!(manager.is_available().await);
    }

    #[test]
    fn test_invalid_hex_key() {
        assert!(EncryptionManager::decode_hex_key("not-hex").is_err());
        assert!(EncryptionManager::decode_hex_key("deadbeef").is_err());
    }

    #[test]
    fn test_generated_key_refused_with_stored_credentials() {
        let generated = EncryptionConfig::default();
        assert!(generated.check_stored_credentials(0).is_ok());
        assert!(matches!(
            generated.check_stored_credentials(3),
            Err(cloudfleet_common::Error::InvalidConfig(_))
        ));

        let configured = EncryptionConfig {
            master_key: Some(EncryptionManager::generate_key_hex()),
            ..Default::default()
        };
        assert!(configured.check_stored_credentials(3).is_ok());
    }

    #[tokio::test]
    async fn test_missing_key_without_autogenerate() {
        let manager = EncryptionManager::new();
        let result = manager
            .initialize(&EncryptionConfig {
                master_key: None,
                key_file: None,
                auto_generate: false,
            })
            .await;
        assert!(result.is_err());
    }
}
