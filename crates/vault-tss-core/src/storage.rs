//! Vault storage
//!
//! Vaults hold key shares, so the file backend only ever writes them sealed
//! with ChaCha20-Poly1305 under a caller-supplied key:
//!
//! - **FileVaultStore**: one encrypted JSON file per vault
//! - **MemoryVaultStore**: plain in-memory map for simulation and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use vault_tss_core::storage::{FileVaultStore, VaultStore, derive_key_from_password};
//!
//! let key = derive_key_from_password("passphrase", &salt)?;
//! let store = FileVaultStore::new("/path/to/vaults", key)?;
//! store.store(&vault).await?;
//! let vault = store.load(&public_key_ecdsa).await?;
//! ```

use crate::{Error, LocalVault, Result};
use async_trait::async_trait;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// A vault sealed for storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedVault {
    /// Sealed vault JSON
    pub ciphertext: Vec<u8>,
    /// Nonce used for encryption (12 bytes)
    pub nonce: [u8; 12],
    /// Vault name (not encrypted)
    pub name: String,
    /// ECDSA public key (not encrypted)
    pub public_key_ecdsa: String,
    /// EdDSA public key (not encrypted)
    pub public_key_eddsa: String,
    /// Time the vault was sealed
    pub sealed_at: DateTime<Utc>,
    /// Format version
    pub version: u32,
}

impl EncryptedVault {
    /// Current version of the sealed format
    pub const CURRENT_VERSION: u32 = 1;

    /// Seal a vault under `encryption_key`
    pub fn encrypt(vault: &LocalVault, encryption_key: &[u8; 32]) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new(encryption_key.into());
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = Zeroizing::new(serde_json::to_vec(vault)?);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(Self {
            ciphertext,
            nonce: nonce_bytes,
            name: vault.name.clone(),
            public_key_ecdsa: vault.public_key_ecdsa.clone(),
            public_key_eddsa: vault.public_key_eddsa.clone(),
            sealed_at: Utc::now(),
            version: Self::CURRENT_VERSION,
        })
    }

    /// Open the sealed vault
    pub fn decrypt(&self, encryption_key: &[u8; 32]) -> Result<LocalVault> {
        if self.version != Self::CURRENT_VERSION {
            return Err(Error::Storage(format!(
                "unsupported vault format version {}",
                self.version
            )));
        }

        let cipher = ChaCha20Poly1305::new(encryption_key.into());
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_ref())
                .map_err(|_| {
                    Error::Encryption("Decryption failed - invalid key or corrupted data".into())
                })?,
        );

        serde_json::from_slice(&plaintext).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Storage backend for vaults, keyed by [`LocalVault::id`]
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Store or overwrite a vault
    async fn store(&self, vault: &LocalVault) -> Result<()>;

    /// Load a vault
    async fn load(&self, id: &str) -> Result<LocalVault>;

    /// Delete a vault
    async fn delete(&self, id: &str) -> Result<()>;

    /// Check if a vault exists
    async fn exists(&self, id: &str) -> Result<bool>;

    /// List stored vault ids
    async fn list(&self) -> Result<Vec<String>>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryVaultStore {
    vaults: Arc<RwLock<HashMap<String, LocalVault>>>,
}

impl MemoryVaultStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn store(&self, vault: &LocalVault) -> Result<()> {
        self.vaults
            .write()
            .await
            .insert(vault.id().to_string(), vault.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<LocalVault> {
        self.vaults
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("vault not found: {}", id)))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.vaults.write().await.remove(id);
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.vaults.read().await.contains_key(id))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.vaults.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Encrypted file store, one `<id>.vault` file per vault
pub struct FileVaultStore {
    base_path: PathBuf,
    encryption_key: Zeroizing<[u8; 32]>,
}

impl FileVaultStore {
    /// Open (and create if missing) a store directory
    pub fn new(base_path: impl Into<PathBuf>, encryption_key: [u8; 32]) -> Result<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        Ok(Self {
            base_path,
            encryption_key: Zeroizing::new(encryption_key),
        })
    }

    fn vault_path(&self, id: &str) -> PathBuf {
        let safe_id = id.replace(['/', '\\', '.', '~'], "_");
        self.base_path.join(format!("{}.vault", safe_id))
    }
}

impl std::fmt::Debug for FileVaultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileVaultStore")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VaultStore for FileVaultStore {
    async fn store(&self, vault: &LocalVault) -> Result<()> {
        let sealed = EncryptedVault::encrypt(vault, &self.encryption_key)?;
        let path = self.vault_path(vault.id());
        tokio::fs::write(&path, serde_json::to_vec_pretty(&sealed)?).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }

    async fn load(&self, id: &str) -> Result<LocalVault> {
        let path = self.vault_path(id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::Storage(format!("vault not found: {}", id)));
        }

        let data = tokio::fs::read(&path).await?;
        let sealed: EncryptedVault =
            serde_json::from_slice(&data).map_err(|e| Error::Deserialization(e.to_string()))?;
        sealed.decrypt(&self.encryption_key)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.vault_path(id);
        if tokio::fs::try_exists(&path).await? {
            let size = tokio::fs::metadata(&path).await?.len() as usize;
            tokio::fs::write(&path, vec![0u8; size]).await?;
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.vault_path(id)).await?)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("vault") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Stretch a password into a storage key
pub fn derive_key_from_password(password: &str, salt: &[u8; 32]) -> Result<[u8; 32]> {
    use sha2::{Digest, Sha256};

    if password.is_empty() {
        return Err(Error::InvalidInput("password must not be empty".into()));
    }

    let mut result = Sha256::new()
        .chain_update(password.as_bytes())
        .chain_update(salt)
        .finalize();
    for _ in 0..10_000 {
        result = Sha256::new().chain_update(result).chain_update(salt).finalize();
    }

    Ok(result.into())
}
