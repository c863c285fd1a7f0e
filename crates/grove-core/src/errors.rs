//! Unified error type for Grove
//!
//! Every crate in the workspace reports failures through [`GroveError`]. The
//! variants split into two groups:
//!
//! - **Structural** errors (`Signature`, `InvalidTree`, `KeyPersistence`,
//!   `PermissionDenied`) reflect state that will not fix itself. They are
//!   surfaced to the caller immediately and never retried.
//! - **Recoverable** errors (`NoReadKey`, `SyncTimeout`, `PeerUnreachable`)
//!   clear up once the ledger or the network catches up. The synchronizer
//!   retries them on its next cycle; callers may retry them too.

use serde::{Deserialize, Serialize};

use crate::effects::StorageError;

/// Unified error type for all Grove operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum GroveError {
    /// The symmetric read key could not be written to durable storage.
    ///
    /// The space is unusable until this is resolved: the read key has no
    /// deterministic derivation and would be lost on restart.
    #[error("Read key persistence failed for {space_id}: {message}")]
    KeyPersistence {
        /// Space whose read key could not be stored
        space_id: String,
        /// Underlying failure
        message: String,
    },

    /// A record was signed with a wrong or unknown key
    #[error("Signature error: {message}")]
    Signature {
        /// Description of the signature failure
        message: String,
    },

    /// The ledger state observed at tree-build time does not grant this
    /// replica a read key for the tree
    #[error("No read key for space {space_id}: {message}")]
    NoReadKey {
        /// Space whose ledger lacks the key
        space_id: String,
        /// Which key was missing
        message: String,
    },

    /// A bounded poll exceeded the caller's timeout
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    SyncTimeout {
        /// Operation that was waiting
        operation: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// A peer could not be reached
    #[error("Peer unreachable: {peer_id}: {message}")]
    PeerUnreachable {
        /// Peer that failed
        peer_id: String,
        /// Transport failure detail
        message: String,
    },

    /// A tree failed structural validation and is marked invalid in the index
    #[error("Invalid tree {tree_id}: {message}")]
    InvalidTree {
        /// Tree that failed validation
        tree_id: String,
        /// Reason the tree is invalid
        message: String,
    },

    /// The actor lacks the permission needed for the operation
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Description of the missing permission
        message: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// What was invalid
        message: String,
    },

    /// A record conflicts with the current ledger head
    #[error("Conflict: {message}")]
    Conflict {
        /// Conflict detail
        message: String,
    },

    /// Storage operation failed
    #[error("Storage error: {message}")]
    Storage {
        /// Storage failure detail
        message: String,
    },

    /// Serialization or deserialization failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Serialization failure detail
        message: String,
    },

    /// Cryptographic operation failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Crypto failure detail
        message: String,
    },

    /// The operation was cancelled by the caller
    #[error("Cancelled: {operation}")]
    Cancelled {
        /// Operation that was cancelled
        operation: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Internal failure detail
        message: String,
    },
}

impl GroveError {
    /// Create a key persistence error
    pub fn key_persistence(space_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyPersistence {
            space_id: space_id.into(),
            message: message.into(),
        }
    }

    /// Create a signature error
    pub fn signature(message: impl Into<String>) -> Self {
        Self::Signature {
            message: message.into(),
        }
    }

    /// Create a missing read key error
    pub fn no_read_key(space_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NoReadKey {
            space_id: space_id.into(),
            message: message.into(),
        }
    }

    /// Create a sync timeout error
    pub fn sync_timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::SyncTimeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a peer unreachable error
    pub fn peer_unreachable(peer_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PeerUnreachable {
            peer_id: peer_id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid tree error
    pub fn invalid_tree(tree_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTree {
            tree_id: tree_id.into(),
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error may clear up on its own once ledger or network
    /// state catches up.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoReadKey { .. }
                | Self::SyncTimeout { .. }
                | Self::PeerUnreachable { .. }
                | Self::Cancelled { .. }
        )
    }
}

/// Standard Result type for Grove operations
pub type Result<T> = std::result::Result<T, GroveError>;

impl From<std::io::Error> for GroveError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(err.to_string()),
            _ => Self::storage(err.to_string()),
        }
    }
}

impl From<bincode::Error> for GroveError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_json::Error> for GroveError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<StorageError> for GroveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PermissionDenied(message) => Self::permission_denied(message),
            StorageError::Corrupted { key, reason } => {
                Self::storage(format!("corrupted entry {key}: {reason}"))
            }
            other => Self::storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GroveError::signature("bad key");
        assert!(matches!(err, GroveError::Signature { .. }));
        assert_eq!(err.to_string(), "Signature error: bad key");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = GroveError::from(io_err);
        assert!(matches!(err, GroveError::NotFound { .. }));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(GroveError::no_read_key("s", "missing").is_recoverable());
        assert!(GroveError::sync_timeout("wait", 10).is_recoverable());
        assert!(GroveError::peer_unreachable("p", "down").is_recoverable());
        assert!(!GroveError::signature("bad").is_recoverable());
        assert!(!GroveError::key_persistence("s", "read-only").is_recoverable());
        assert!(!GroveError::invalid_tree("t", "cycle").is_recoverable());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err = GroveError::from(StorageError::WriteFailed("disk full".into()));
        assert!(matches!(err, GroveError::Storage { .. }));

        let err = GroveError::from(StorageError::PermissionDenied("ro".into()));
        assert!(matches!(err, GroveError::PermissionDenied { .. }));
    }
}
