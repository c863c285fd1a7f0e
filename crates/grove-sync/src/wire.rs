//! Sync messages
//!
//! The transport decides how these travel; [`to_bytes`](SyncRequest::to_bytes)
//! helpers are provided for transports that need a byte form.

use grove_acl::AclRecord;
use grove_core::crypto::Hash32;
use grove_core::{ChangeId, GroveError, RecordId, Result, SpaceId, TreeId};
use grove_tree::RawChange;
use serde::{Deserialize, Serialize};

/// A question one peer asks another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRequest {
    /// Ledger records after `after` (all when `None`)
    AclRecords {
        /// Space
        space_id: SpaceId,
        /// Last record the requester holds
        after: Option<RecordId>,
    },
    /// Heads of every valid tree in a space
    SpaceDigest {
        /// Space
        space_id: SpaceId,
    },
    /// Every change of one tree
    FullTree {
        /// Space
        space_id: SpaceId,
        /// Tree
        tree_id: TreeId,
    },
    /// Changes a holder of `known_heads` is missing
    TreeChangesSince {
        /// Space
        space_id: SpaceId,
        /// Tree
        tree_id: TreeId,
        /// Requester's heads
        known_heads: Vec<ChangeId>,
    },
}

impl SyncRequest {
    /// Space the request concerns
    pub fn space_id(&self) -> &SpaceId {
        match self {
            SyncRequest::AclRecords { space_id, .. }
            | SyncRequest::SpaceDigest { space_id }
            | SyncRequest::FullTree { space_id, .. }
            | SyncRequest::TreeChangesSince { space_id, .. } => space_id,
        }
    }

    /// Encode with bincode
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode with bincode
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| GroveError::serialization(format!("malformed sync request: {e}")))
    }
}

/// Digest entry for one tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDigest {
    /// Tree
    pub tree_id: TreeId,
    /// Digest of the sender's heads
    pub head_hash: Hash32,
}

/// Answer to a [`SyncRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncResponse {
    /// Ordered ledger records
    AclRecords(Vec<AclRecord>),
    /// Per-tree head digests
    SpaceDigest(Vec<TreeDigest>),
    /// Tree changes
    Changes(Vec<RawChange>),
}

impl SyncResponse {
    /// Encode with bincode
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode with bincode
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| GroveError::serialization(format!("malformed sync response: {e}")))
    }

    /// Unwrap ledger records
    pub fn into_acl_records(self) -> Result<Vec<AclRecord>> {
        match self {
            SyncResponse::AclRecords(records) => Ok(records),
            other => Err(unexpected("ledger records", &other)),
        }
    }

    /// Unwrap a space digest
    pub fn into_digest(self) -> Result<Vec<TreeDigest>> {
        match self {
            SyncResponse::SpaceDigest(digest) => Ok(digest),
            other => Err(unexpected("space digest", &other)),
        }
    }

    /// Unwrap tree changes
    pub fn into_changes(self) -> Result<Vec<RawChange>> {
        match self {
            SyncResponse::Changes(changes) => Ok(changes),
            other => Err(unexpected("tree changes", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &SyncResponse) -> GroveError {
    let got = match got {
        SyncResponse::AclRecords(_) => "ledger records",
        SyncResponse::SpaceDigest(_) => "space digest",
        SyncResponse::Changes(_) => "tree changes",
    };
    GroveError::invalid(format!("expected {wanted}, peer answered with {got}"))
}

/// Push notification that a tree gained changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadUpdate {
    /// Space
    pub space_id: SpaceId,
    /// Tree
    pub tree_id: TreeId,
    /// Sender's heads after the write
    pub heads: Vec<ChangeId>,
    /// The new changes
    pub changes: Vec<RawChange>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use grove_core::{OwnerId, SigningKey, SpaceKind};

    #[test]
    fn test_request_bytes_round_trip() {
        let space_id = SpaceId::derive(&OwnerId::new("o"), SpaceKind::Community, &SigningKey::generate().public_key());
        let request = SyncRequest::TreeChangesSince {
            space_id: space_id.clone(),
            tree_id: TreeId(Hash32::of(b"t")),
            known_heads: vec![ChangeId(Hash32::of(b"h"))],
        };
        let decoded = SyncRequest::from_bytes(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.space_id(), &space_id);
    }

    #[test]
    fn test_wrong_response_kind_is_invalid() {
        let err = SyncResponse::Changes(Vec::new()).into_digest().unwrap_err();
        assert_matches!(err, GroveError::Invalid { .. });
    }
}
