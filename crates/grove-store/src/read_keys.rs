//! Durable read key store
//!
//! Read keys are random, so losing the persisted copy loses the space for
//! the owner until the ledger can be re-read. Every write failure is
//! surfaced as [`GroveError::KeyPersistence`] and must be treated as fatal
//! by the caller.

use grove_core::crypto::{ReadKey, ReadKeyId};
use grove_core::effects::StorageEffects;
use grove_core::{GroveError, Result, SpaceId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::filesystem::FilesystemStorage;

const KEY_PREFIX: &str = "readkey";

/// Persists the read key of each space this replica owns or has joined
#[derive(Clone)]
pub struct ReadKeyStore {
    storage: Arc<dyn StorageEffects>,
}

impl std::fmt::Debug for ReadKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadKeyStore").finish_non_exhaustive()
    }
}

impl ReadKeyStore {
    /// Wrap an arbitrary storage backend
    pub fn new(storage: Arc<dyn StorageEffects>) -> Self {
        Self { storage }
    }

    /// Open a filesystem-backed store rooted at `dir`
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let storage = FilesystemStorage::new(dir.as_ref().to_path_buf())?;
        Ok(Self::new(Arc::new(storage)))
    }

    /// Platform default key directory (`<data_dir>/grove/keys`)
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grove")
            .join("keys")
    }

    fn key_for(space_id: &SpaceId, key_id: &ReadKeyId) -> String {
        format!("{KEY_PREFIX}/{space_id}/{}", key_id.0.to_hex())
    }

    fn current_key_for(space_id: &SpaceId) -> String {
        format!("{KEY_PREFIX}/{space_id}/current")
    }

    /// Persist `key` as the current read key of `space_id`
    ///
    /// Older keys stay readable through [`ReadKeyStore::load_all`].
    pub async fn persist(&self, space_id: &SpaceId, key: &ReadKey) -> Result<()> {
        let bytes = key.as_bytes().to_vec();
        let result = self
            .storage
            .store_batch(vec![
                (Self::key_for(space_id, &key.id()), bytes.clone()),
                (Self::current_key_for(space_id), bytes),
            ])
            .await;

        match result {
            Ok(()) => {
                debug!(space = %space_id, key_id = %key.id(), "persisted read key");
                Ok(())
            }
            Err(e) => {
                error!(space = %space_id, error = %e, "read key persistence failed");
                Err(GroveError::key_persistence(space_id.as_str(), e.to_string()))
            }
        }
    }

    /// Load the current read key of `space_id`
    pub async fn load(&self, space_id: &SpaceId) -> Result<Option<ReadKey>> {
        match self.storage.retrieve(&Self::current_key_for(space_id)).await? {
            Some(bytes) => {
                let bytes = Zeroizing::new(bytes);
                Ok(Some(ReadKey::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Load every read key ever persisted for `space_id`
    pub async fn load_all(&self, space_id: &SpaceId) -> Result<Vec<ReadKey>> {
        let prefix = format!("{KEY_PREFIX}/{space_id}/");
        let mut keys = Vec::new();
        for storage_key in self.storage.list_keys(Some(&prefix)).await? {
            if storage_key.ends_with("/current") {
                continue;
            }
            if let Some(bytes) = self.storage.retrieve(&storage_key).await? {
                let bytes = Zeroizing::new(bytes);
                keys.push(ReadKey::from_slice(&bytes)?);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use async_trait::async_trait;
    use grove_core::crypto::SigningKey;
    use grove_core::effects::StorageError;
    use grove_core::{OwnerId, SpaceKind};

    struct ReadOnlyStorage;

    #[async_trait]
    impl StorageEffects for ReadOnlyStorage {
        async fn store(&self, _key: &str, _value: Vec<u8>) -> std::result::Result<(), StorageError> {
            Err(StorageError::PermissionDenied("read-only volume".to_string()))
        }

        async fn retrieve(&self, _key: &str) -> std::result::Result<Option<Vec<u8>>, StorageError> {
            Ok(None)
        }

        async fn remove(&self, _key: &str) -> std::result::Result<bool, StorageError> {
            Ok(false)
        }

        async fn list_keys(
            &self,
            _prefix: Option<&str>,
        ) -> std::result::Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn space() -> SpaceId {
        let master = SigningKey::from_bytes(&[4u8; 32]).public_key();
        SpaceId::derive(&OwnerId::new("owner"), SpaceKind::Private, &master)
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let store = ReadKeyStore::new(Arc::new(MemoryStorage::new()));
        let key = ReadKey::generate();
        store.persist(&space(), &key).await.unwrap();

        assert_eq!(store.load(&space()).await.unwrap(), Some(key.clone()));
        assert_eq!(store.load_all(&space()).await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_keys() {
        let store = ReadKeyStore::new(Arc::new(MemoryStorage::new()));
        let first = ReadKey::generate();
        let second = ReadKey::generate();
        store.persist(&space(), &first).await.unwrap();
        store.persist(&space(), &second).await.unwrap();

        assert_eq!(store.load(&space()).await.unwrap(), Some(second.clone()));
        let all = store.load_all(&space()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&first) && all.contains(&second));
    }

    #[tokio::test]
    async fn test_write_failure_is_key_persistence_error() {
        let store = ReadKeyStore::new(Arc::new(ReadOnlyStorage));
        let err = store.persist(&space(), &ReadKey::generate()).await.unwrap_err();
        assert!(matches!(err, GroveError::KeyPersistence { .. }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_filesystem_keys_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = ReadKey::generate();
        ReadKeyStore::open_dir(dir.path())
            .unwrap()
            .persist(&space(), &key)
            .await
            .unwrap();

        let reopened = ReadKeyStore::open_dir(dir.path()).unwrap();
        assert_eq!(reopened.load(&space()).await.unwrap(), Some(key));
    }
}
