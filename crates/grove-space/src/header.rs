//! Space header
//!
//! The header ties a space id to the keys that govern it. The master key
//! signs `(owner, kind, signing key)`, and the space id is derived from
//! `(owner, kind, master key)`, so a verified header proves the signing
//! key belongs to the space.

use grove_core::crypto::{Hash32, PublicKey, Signature, SigningKey};
use grove_core::{GroveError, OwnerId, Result, SpaceId, SpaceKind};
use serde::{Deserialize, Serialize};

const HEADER_DOMAIN: &[u8] = b"grove.space.header.v1";

/// Signed description of a space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceHeader {
    /// Application-level owner identifier
    pub owner: OwnerId,
    /// Space kind
    pub kind: SpaceKind,
    /// Master public key (space id input)
    pub master_key: PublicKey,
    /// Registered signer for ledger root and credentials
    pub signing_key: PublicKey,
    /// Master signature over owner, kind and signing key
    pub master_signature: Signature,
}

fn signed_bytes(owner: &OwnerId, kind: SpaceKind, signing_key: &PublicKey) -> Vec<u8> {
    Hash32::of_parts(&[
        HEADER_DOMAIN,
        owner.as_str().as_bytes(),
        kind.as_str().as_bytes(),
        signing_key.as_bytes(),
    ])
    .as_bytes()
    .to_vec()
}

impl SpaceHeader {
    /// Sign a header with the master key
    pub fn new(owner: OwnerId, kind: SpaceKind, master: &SigningKey, signing_key: PublicKey) -> Self {
        let master_signature = master.sign(&signed_bytes(&owner, kind, &signing_key));
        Self {
            owner,
            kind,
            master_key: master.public_key(),
            signing_key,
            master_signature,
        }
    }

    /// Deterministic space id
    pub fn space_id(&self) -> SpaceId {
        SpaceId::derive(&self.owner, self.kind, &self.master_key)
    }

    /// Check the master signature
    pub fn verify(&self) -> Result<()> {
        self.master_key
            .verify(
                &signed_bytes(&self.owner, self.kind, &self.signing_key),
                &self.master_signature,
            )
            .map_err(|_| GroveError::signature(format!("space header {} is not signed by its master key", self.space_id())))
    }

    /// Encode for storage or the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from storage or the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| GroveError::serialization(format!("malformed space header: {e}")))
    }
}
