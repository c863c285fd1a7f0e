//! Hardened filesystem storage handler
//!
//! Each `/`-separated key segment becomes a directory level under the base
//! path, so prefix listing is a directory walk. Writes go to a temporary
//! file that is synced and renamed into place. Every file starts with the
//! BLAKE3 hash of its payload, checked on every read.
//!
//! File and directory permissions are owner-only (`0o600` / `0o700`).

use async_trait::async_trait;
use grove_core::effects::{StorageEffects, StorageError};
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const DATA_EXTENSION: &str = "dat";
const TEMP_EXTENSION: &str = "tmp";
const CHECKSUM_LEN: usize = 32;
const MAX_KEY_LEN: usize = 1024;

/// Configuration for filesystem storage
#[derive(Debug, Clone)]
pub struct FilesystemStorageConfig {
    /// File permissions mode
    pub file_permissions: u32,
    /// Directory permissions mode
    pub dir_permissions: u32,
    /// Maximum size of a single value in bytes
    pub max_value_size: u64,
}

impl Default for FilesystemStorageConfig {
    fn default() -> Self {
        Self {
            file_permissions: 0o600,
            dir_permissions: 0o700,
            max_value_size: 64 * 1024 * 1024,
        }
    }
}

/// Filesystem storage handler with integrity protection
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    base_path: PathBuf,
    config: FilesystemStorageConfig,
}

impl FilesystemStorage {
    /// Open (creating if needed) a store rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::with_config(base_path, FilesystemStorageConfig::default())
    }

    /// Open with explicit configuration
    pub fn with_config(
        base_path: impl Into<PathBuf>,
        config: FilesystemStorageConfig,
    ) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| StorageError::ConfigurationError {
            reason: format!("failed to create storage directory {}: {e}", base_path.display()),
        })?;
        std::fs::set_permissions(&base_path, Permissions::from_mode(config.dir_permissions))
            .map_err(|e| {
                StorageError::PermissionDenied(format!("failed to set directory permissions: {e}"))
            })?;

        info!(path = %base_path.display(), "initialized filesystem storage");
        Ok(Self { base_path, config })
    }

    /// Root directory of this store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn validate_key(key: &str) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey {
                reason: "key cannot be empty".to_string(),
            });
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StorageError::InvalidKey {
                reason: format!("key too long (max {MAX_KEY_LEN} bytes)"),
            });
        }
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidKey {
                    reason: format!("invalid path segment in '{key}'"),
                });
            }
            if segment.contains('\0') || segment.contains('\\') {
                return Err(StorageError::InvalidKey {
                    reason: "key contains invalid characters".to_string(),
                });
            }
        }
        Ok(())
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        // Appended rather than set so dotted segments survive.
        let mut file_name = path.file_name().unwrap_or_default().to_os_string();
        file_name.push(".");
        file_name.push(DATA_EXTENSION);
        path.set_file_name(file_name);
        path
    }

    fn path_to_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect();
        let key = segments?.join("/");
        key.strip_suffix(&format!(".{DATA_EXTENSION}"))
            .map(str::to_string)
    }

    async fn ensure_parent(&self, path: &Path) -> Result<(), StorageError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if fs::metadata(parent).await.is_ok() {
            return Ok(());
        }
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to create directory: {e}")))?;

        // Tighten every directory created under the base path.
        let mut current = parent;
        while current != self.base_path {
            fs::set_permissions(current, Permissions::from_mode(self.config.dir_permissions))
                .await
                .map_err(|e| {
                    StorageError::PermissionDenied(format!("failed to set permissions: {e}"))
                })?;
            match current.parent() {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(".");
        temp_name.push(TEMP_EXTENSION);
        let temp_path = PathBuf::from(temp_name);
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to create temp file: {e}")))?;
        file.write_all(data)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to write data: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to sync: {e}")))?;
        fs::set_permissions(&temp_path, Permissions::from_mode(self.config.file_permissions))
            .await
            .map_err(|e| StorageError::PermissionDenied(format!("failed to set permissions: {e}")))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("failed to rename temp file: {e}")))?;
        Ok(())
    }

    fn encode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHECKSUM_LEN + data.len());
        out.extend_from_slice(blake3::hash(data).as_bytes());
        out.extend_from_slice(data);
        out
    }

    fn decode(key: &str, raw: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        if raw.len() < CHECKSUM_LEN {
            return Err(StorageError::Corrupted {
                key: key.to_string(),
                reason: "file shorter than checksum header".to_string(),
            });
        }
        let (checksum, data) = raw.split_at(CHECKSUM_LEN);
        if blake3::hash(data).as_bytes() != checksum {
            warn!(key, "integrity check failed");
            return Err(StorageError::Corrupted {
                key: key.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }
        Ok(data.to_vec())
    }

    async fn walk(&self, root: PathBuf) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::ListFailed(format!("{}: {e}", dir.display()))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::ListFailed(e.to_string()))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some(DATA_EXTENSION) {
                    if let Some(key) = self.path_to_key(&path) {
                        keys.push(key);
                    }
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl StorageEffects for FilesystemStorage {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        Self::validate_key(key)?;
        if value.len() as u64 > self.config.max_value_size {
            return Err(StorageError::WriteFailed(format!(
                "value of {} bytes exceeds limit of {}",
                value.len(),
                self.config.max_value_size
            )));
        }
        let path = self.key_to_path(key);
        self.ensure_parent(&path).await?;
        self.write_atomic(&path, &Self::encode(&value)).await?;
        debug!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Self::validate_key(key)?;
        match fs::read(self.key_to_path(key)).await {
            Ok(raw) => Self::decode(key, raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed(format!("{key}: {e}"))),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Self::validate_key(key)?;
        match fs::remove_file(self.key_to_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!("{key}: {e}"))),
        }
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        // Walk only the deepest directory fully named by the prefix.
        let root = match prefix.and_then(|p| p.rsplit_once('/')) {
            Some((dir, _)) if Self::validate_key(dir).is_ok() => {
                let mut root = self.base_path.clone();
                for segment in dir.split('/') {
                    root.push(segment);
                }
                root
            }
            _ => self.base_path.clone(),
        };

        let mut keys = self.walk(root).await?;
        if let Some(prefix) = prefix {
            keys.retain(|k| k.starts_with(prefix));
        }
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Self::validate_key(key)?;
        Ok(fs::metadata(self.key_to_path(key)).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, FilesystemStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(dir.path().join("store")).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_store_retrieve_remove() {
        let (_dir, storage) = storage();
        storage.store("space/a/tree/t1", b"hello".to_vec()).await.unwrap();
        assert_eq!(
            storage.retrieve("space/a/tree/t1").await.unwrap(),
            Some(b"hello".to_vec())
        );
        assert!(storage.exists("space/a/tree/t1").await.unwrap());
        assert!(storage.remove("space/a/tree/t1").await.unwrap());
        assert_eq!(storage.retrieve("space/a/tree/t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let (_dir, storage) = storage();
        storage.store("k", vec![1]).await.unwrap();
        storage.store("k", vec![2, 3]).await.unwrap();
        assert_eq!(storage.retrieve("k").await.unwrap(), Some(vec![2, 3]));
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (_dir, storage) = storage();
        for key in ["", "../escape", "a//b", "a/./b", "a/\0"] {
            assert!(matches!(
                storage.store(key, vec![]).await,
                Err(StorageError::InvalidKey { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_prefix_listing() {
        let (_dir, storage) = storage();
        for key in [
            "space/s1/tree/b",
            "space/s1/tree/a",
            "space/s2/tree/c",
            "acl/s1/record/00000000000000000001",
        ] {
            storage.store(key, vec![0]).await.unwrap();
        }

        assert_eq!(
            storage.list_keys(Some("space/s1/")).await.unwrap(),
            vec!["space/s1/tree/a".to_string(), "space/s1/tree/b".to_string()]
        );
        assert_eq!(storage.list_keys(Some("space/s")).await.unwrap().len(), 3);
        assert_eq!(storage.list_keys(None).await.unwrap().len(), 4);
        assert!(storage.list_keys(Some("missing/")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detects_corruption() {
        let (_dir, storage) = storage();
        storage.store("k", b"payload".to_vec()).await.unwrap();

        let path = storage.key_to_path("k");
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        assert!(matches!(
            storage.retrieve("k").await,
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn test_files_are_owner_only() {
        let (_dir, storage) = storage();
        storage.store("keys/space", vec![7]).await.unwrap();
        let mode = std::fs::metadata(storage.key_to_path("keys/space"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
