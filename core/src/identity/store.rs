// Identity storage using sled
//
// The private key never touches disk in the clear: it is sealed under the
// account password with the same wire format used for messages.

use super::{IdentityError, IdentityKeys};
use crate::crypto::{self, CryptoError};
use parking_lot::Mutex;
use std::path::Path;

const IDENTITY_KEY: &[u8] = b"identity_keys";

/// Storage backend for identity keys
pub enum IdentityStore {
    Memory(Mutex<Option<String>>),
    Persistent(sled::Db),
}

impl IdentityStore {
    /// Create in-memory storage
    pub fn memory() -> Self {
        Self::Memory(Mutex::new(None))
    }

    /// Open (or create) the identity database at `path`
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        Ok(Self::Persistent(sled::open(path)?))
    }

    /// Seal `keys` under `password` and store them
    pub fn save_keys(&self, keys: &IdentityKeys, password: &str) -> Result<(), IdentityError> {
        let private_key = keys.private_key_base58();
        let sealed = crypto::seal_str(password.as_bytes(), &private_key)?;

        match self {
            Self::Memory(slot) => {
                *slot.lock() = Some(sealed);
            }
            Self::Persistent(db) => {
                db.insert(IDENTITY_KEY, sealed.as_bytes())?;
                db.flush()?;
            }
        }
        Ok(())
    }

    pub fn has_keys(&self) -> Result<bool, IdentityError> {
        Ok(self.load_sealed()?.is_some())
    }

    /// Load and unseal stored keys.
    ///
    /// Returns `Ok(None)` if nothing is stored and
    /// [`IdentityError::BadPassword`] if `password` does not open them.
    pub fn load_keys(&self, password: &str) -> Result<Option<IdentityKeys>, IdentityError> {
        let Some(sealed) = self.load_sealed()? else {
            return Ok(None);
        };

        let private_key = zeroize::Zeroizing::new(
            crypto::open_str(password.as_bytes(), &sealed).map_err(|e| match e {
                CryptoError::Authentication => IdentityError::BadPassword,
                other => IdentityError::Crypto(other),
            })?,
        );

        Ok(Some(IdentityKeys::from_private_base58(&private_key)?))
    }

    /// Clear stored keys
    pub fn clear(&self) -> Result<(), IdentityError> {
        match self {
            Self::Memory(slot) => {
                slot.lock().take();
            }
            Self::Persistent(db) => {
                db.remove(IDENTITY_KEY)?;
                db.flush()?;
            }
        }
        Ok(())
    }

    fn load_sealed(&self) -> Result<Option<String>, IdentityError> {
        match self {
            Self::Memory(slot) => Ok(slot.lock().clone()),
            Self::Persistent(db) => match db.get(IDENTITY_KEY)? {
                Some(bytes) => String::from_utf8(bytes.to_vec())
                    .map(Some)
                    .map_err(|_| IdentityError::Corrupt),
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store() {
        let store = IdentityStore::memory();
        assert!(store.load_keys("pw").unwrap().is_none());

        let keys = IdentityKeys::generate();
        store.save_keys(&keys, "pw").unwrap();

        let loaded = store.load_keys("pw").unwrap().unwrap();
        assert_eq!(keys.public_key_base58(), loaded.public_key_base58());
    }

    #[test]
    fn test_bad_password() {
        let store = IdentityStore::memory();
        store.save_keys(&IdentityKeys::generate(), "correct").unwrap();

        assert!(matches!(store.load_keys("wrong"), Err(IdentityError::BadPassword)));
    }

    #[test]
    fn test_private_key_not_stored_in_clear() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::persistent(dir.path().join("alice")).unwrap();
        let keys = IdentityKeys::generate();
        store.save_keys(&keys, "pw").unwrap();

        let sealed = store.load_sealed().unwrap().unwrap();
        assert!(!sealed.contains(keys.private_key_base58().as_str()));
        assert_eq!(sealed.split(',').count(), 3);
    }

    #[test]
    fn test_store_clear() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::persistent(dir.path().join("alice")).unwrap();

        store.save_keys(&IdentityKeys::generate(), "pw").unwrap();
        assert!(store.has_keys().unwrap());
        store.clear().unwrap();
        assert!(store.load_keys("pw").unwrap().is_none());
    }

    #[test]
    fn test_store_persistence_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alice");
        let keys = IdentityKeys::generate();

        {
            let store = IdentityStore::persistent(&path).unwrap();
            store.save_keys(&keys, "pw").unwrap();
        }

        {
            let store = IdentityStore::persistent(&path).unwrap();
            let loaded = store.load_keys("pw").unwrap().unwrap();
            assert_eq!(keys.public_key_base58(), loaded.public_key_base58());
        }
    }
}
