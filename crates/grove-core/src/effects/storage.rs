//! Durable key-value storage effect
//!
//! Every persistent structure in Grove (tree changes, ledger records, space
//! headers, read keys) is written through [`StorageEffects`]. Keys are
//! `/`-separated paths such as `space/<id>/tree/<tree>/change/<change>`;
//! backends must support prefix listing over them.
//!
//! Implementations live in `grove-store` (memory and filesystem).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Storage operation errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StorageError {
    /// Reading a value failed
    #[error("Read failed: {0}")]
    ReadFailed(String),
    /// Writing a value failed
    #[error("Write failed: {0}")]
    WriteFailed(String),
    /// Removing a value failed
    #[error("Delete failed: {0}")]
    DeleteFailed(String),
    /// Listing keys failed
    #[error("List failed: {0}")]
    ListFailed(String),
    /// The key is malformed for this backend
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },
    /// Stored bytes failed their integrity check
    #[error("Corrupted entry {key}: {reason}")]
    Corrupted {
        /// Key of the corrupted entry
        key: String,
        /// Integrity failure detail
        reason: String,
    },
    /// The backend refused access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Backend misconfiguration
    #[error("Configuration error: {reason}")]
    ConfigurationError {
        /// Configuration problem
        reason: String,
    },
}

/// Async key-value persistence
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch the value under `key`
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove `key`; returns whether it existed
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys starting with `prefix` (all keys when `None`), sorted
    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError>;

    /// Whether `key` exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.retrieve(key).await?.is_some())
    }

    /// Store several pairs; backends may override for atomicity
    async fn store_batch(&self, pairs: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
        for (key, value) in pairs {
            self.store(&key, value).await?;
        }
        Ok(())
    }
}
