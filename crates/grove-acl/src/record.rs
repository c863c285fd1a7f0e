//! Ledger records
//!
//! Every record is signed by its actor and names the record it follows, so
//! a space's ledger is a single hash-linked chain rooted at a [`AclGrant::Root`]
//! record.

use grove_core::crypto::{Hash32, PublicKey, ReadKeyId, Signature, SigningKey};
use grove_core::{now_ms, GroveError, OwnerId, RecordId, Result, SpaceId};
use serde::{Deserialize, Serialize};
use std::fmt;

const RECORD_ID_DOMAIN: &[u8] = b"grove.acl.record.v1";
const JOIN_DOMAIN: &[u8] = b"grove.acl.join.v1";

// =============================================================================
// Permissions
// =============================================================================

/// Member permission levels, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    /// Holds the read key
    Reader,
    /// Reader who may append tree changes
    Writer,
    /// Writer who may invite, add, remove and re-permission members
    Admin,
    /// Space creator; cannot be removed or demoted
    Owner,
}

impl Permission {
    /// May append tree changes
    pub fn can_write(&self) -> bool {
        *self >= Permission::Writer
    }

    /// May change membership
    pub fn can_manage(&self) -> bool {
        *self >= Permission::Admin
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Reader => "reader",
            Permission::Writer => "writer",
            Permission::Admin => "admin",
            Permission::Owner => "owner",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = GroveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reader" => Ok(Permission::Reader),
            "writer" => Ok(Permission::Writer),
            "admin" => Ok(Permission::Admin),
            "owner" => Ok(Permission::Owner),
            other => Err(GroveError::invalid(format!("unknown permission '{other}'"))),
        }
    }
}

// =============================================================================
// Grants
// =============================================================================

/// Read key rotation carried by a member removal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotation {
    /// Id of the key that becomes current
    pub new_read_key_id: ReadKeyId,
    /// New key sealed to each remaining member
    pub sealed_keys: Vec<(PublicKey, Vec<u8>)>,
    /// Id of the key being replaced
    pub previous_read_key_id: ReadKeyId,
    /// Replaced key encrypted under the new key, so history stays readable
    pub previous_key_encrypted: Vec<u8>,
}

/// What a record does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclGrant {
    /// First record of a space; the actor becomes owner
    Root {
        /// Application-level owner identifier
        owner: OwnerId,
        /// Initial read key id
        read_key_id: ReadKeyId,
        /// Initial read key sealed to the actor
        sealed_read_key: Vec<u8>,
        /// Owner metadata sealed to the space metadata key
        encrypted_metadata: Vec<u8>,
    },
    /// Offer membership to whoever holds the invite key
    Invite {
        /// Public half of a one-off invite key
        invite_key: PublicKey,
        /// Permission the joiner receives
        permission: Permission,
        /// Id of the read key sealed below
        read_key_id: ReadKeyId,
        /// Current read key sealed to `invite_key`
        sealed_read_key: Vec<u8>,
    },
    /// Redeem an invite; the actor is the joiner
    Join {
        /// Invite being redeemed
        invite_id: RecordId,
        /// Proof of the invite key over [`join_message`]
        invite_signature: Signature,
        /// Read key re-sealed to the joiner
        sealed_read_key: Vec<u8>,
    },
    /// Add a member directly
    AddMember {
        /// New member identity
        identity: PublicKey,
        /// Granted permission
        permission: Permission,
        /// Current read key sealed to `identity`
        sealed_read_key: Vec<u8>,
    },
    /// Change an existing member's permission
    ChangePermission {
        /// Member identity
        identity: PublicKey,
        /// New permission
        permission: Permission,
    },
    /// Remove a member and rotate the read key
    RemoveMember {
        /// Member identity
        identity: PublicKey,
        /// Replacement read key distribution
        rotation: KeyRotation,
    },
    /// Withdraw an unredeemed invite
    RevokeInvite {
        /// Invite being revoked
        invite_id: RecordId,
    },
}

impl AclGrant {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            AclGrant::Root { .. } => "root",
            AclGrant::Invite { .. } => "invite",
            AclGrant::Join { .. } => "join",
            AclGrant::AddMember { .. } => "add_member",
            AclGrant::ChangePermission { .. } => "change_permission",
            AclGrant::RemoveMember { .. } => "remove_member",
            AclGrant::RevokeInvite { .. } => "revoke_invite",
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Signed portion of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclPayload {
    /// Space this ledger belongs to
    pub space_id: SpaceId,
    /// Signing identity of the actor
    pub actor: PublicKey,
    /// The grant
    pub grant: AclGrant,
    /// Previous record; `None` only on the root
    pub preceding: Option<RecordId>,
    /// Actor wall clock, informational only
    pub timestamp_ms: u64,
}

/// A signed ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRecord {
    /// Signed content
    pub payload: AclPayload,
    /// Actor signature over the encoded payload
    pub signature: Signature,
}

impl AclRecord {
    /// Sign a grant as `signer`, linking it after `preceding`
    pub fn sign(
        space_id: SpaceId,
        preceding: Option<RecordId>,
        grant: AclGrant,
        signer: &SigningKey,
    ) -> Result<Self> {
        let payload = AclPayload {
            space_id,
            actor: signer.public_key(),
            grant,
            preceding,
            timestamp_ms: now_ms(),
        };
        let signature = signer.sign(&bincode::serialize(&payload)?);
        Ok(Self { payload, signature })
    }

    /// Content-addressed record id
    pub fn id(&self) -> RecordId {
        let encoded = bincode::serialize(&self.payload).unwrap_or_default();
        RecordId(Hash32::of_parts(&[
            RECORD_ID_DOMAIN,
            &encoded,
            &self.signature.to_bytes(),
        ]))
    }

    /// Check the actor's signature
    pub fn verify_signature(&self) -> Result<()> {
        let encoded = bincode::serialize(&self.payload)?;
        self.payload
            .actor
            .verify(&encoded, &self.signature)
            .map_err(|_| GroveError::signature(format!("ledger record {} has a bad signature", self.id())))
    }

    /// Space the record belongs to
    pub fn space_id(&self) -> &SpaceId {
        &self.payload.space_id
    }

    /// Encode for storage or the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from storage or the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| GroveError::serialization(format!("malformed ledger record: {e}")))
    }
}

/// Message the invite key signs to authorise a join
pub fn join_message(space_id: &SpaceId, invite_id: &RecordId, identity: &PublicKey) -> Vec<u8> {
    Hash32::of_parts(&[
        JOIN_DOMAIN,
        space_id.as_str().as_bytes(),
        invite_id.0.as_bytes(),
        identity.as_bytes(),
    ])
    .as_bytes()
    .to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::crypto::ReadKey;
    use grove_core::SpaceKind;

    fn root(signer: &SigningKey) -> AclRecord {
        let space_id = SpaceId::derive(&OwnerId::new("o"), SpaceKind::Private, &signer.public_key());
        AclRecord::sign(
            space_id,
            None,
            AclGrant::Root {
                owner: OwnerId::new("o"),
                read_key_id: ReadKey::generate().id(),
                sealed_read_key: vec![1],
                encrypted_metadata: vec![2],
            },
            signer,
        )
        .unwrap()
    }

    #[test]
    fn test_permission_order() {
        assert!(Permission::Owner.can_manage());
        assert!(Permission::Admin.can_manage());
        assert!(!Permission::Writer.can_manage());
        assert!(Permission::Writer.can_write());
        assert!(!Permission::Reader.can_write());
        assert_eq!("admin".parse::<Permission>().unwrap(), Permission::Admin);
    }

    #[test]
    fn test_signature_round_trip() {
        let signer = SigningKey::generate();
        let record = root(&signer);
        assert!(record.verify_signature().is_ok());

        let decoded = AclRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.id(), record.id());
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let signer = SigningKey::generate();
        let mut record = root(&signer);
        record.payload.timestamp_ms += 1;
        assert!(matches!(
            record.verify_signature(),
            Err(GroveError::Signature { .. })
        ));
    }
}
