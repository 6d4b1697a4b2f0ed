// Identity — secp256k1 client keys and their password-sealed storage

mod keys;
mod store;

pub use keys::{decode_public_key, is_valid_public_key, IdentityKeys, PUBLIC_KEY_LEN};
pub use store::IdentityStore;

use crate::crypto::CryptoError;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("Incorrect password")]
    BadPassword,
    #[error("Stored identity is corrupt")]
    Corrupt,
    #[error("Identity not initialized")]
    NotInitialized,
    #[error("Identity storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Manages a client's identity keys
pub struct IdentityManager {
    store: IdentityStore,
    keys: Option<IdentityKeys>,
}

impl IdentityManager {
    /// Create a new identity manager with in-memory storage
    pub fn new() -> Self {
        Self {
            store: IdentityStore::memory(),
            keys: None,
        }
    }

    /// Create a new identity manager with persistent storage
    pub fn with_path(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        Ok(Self {
            store: IdentityStore::persistent(path)?,
            keys: None,
        })
    }

    /// Whether a sealed identity already exists in the store
    pub fn has_identity(&self) -> Result<bool, IdentityError> {
        self.store.has_keys()
    }

    /// Load the stored identity, or generate and store a new one.
    pub fn initialize(&mut self, password: &str) -> Result<&IdentityKeys, IdentityError> {
        let keys = match self.store.load_keys(password)? {
            Some(keys) => {
                tracing::info!("🔑 Loaded existing identity");
                keys
            }
            None => {
                tracing::info!("🔑 Generating new identity");
                let keys = IdentityKeys::generate();
                self.store.save_keys(&keys, password)?;
                keys
            }
        };

        Ok(self.keys.insert(keys))
    }

    /// Get identity keys (if initialized)
    pub fn keys(&self) -> Option<&IdentityKeys> {
        self.keys.as_ref()
    }

    /// Base58 public key (if initialized)
    pub fn public_key_base58(&self) -> Option<String> {
        self.keys.as_ref().map(IdentityKeys::public_key_base58)
    }

    /// Take the loaded keys out of the manager
    pub fn into_keys(self) -> Result<IdentityKeys, IdentityError> {
        self.keys.ok_or(IdentityError::NotInitialized)
    }
}

impl Default for IdentityManager {
    fn default() -> Self {
        Self::new()
    }
}
