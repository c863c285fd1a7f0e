//! Change records
//!
//! A change is a signed, bincode-encoded [`ChangePayload`]. The payload is
//! plaintext except for `encrypted_data`, so peers can validate structure
//! and signatures without holding the read key. The root change carries
//! the [`TreeHeader`]; every other change names its tree and its parents.

use grove_core::crypto::{Hash32, PublicKey, ReadKeyId, Signature, SigningKey};
use grove_core::{ChangeId, GroveError, Result, SpaceId, TreeId};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const CHANGE_ID_DOMAIN: &[u8] = b"grove.change.v1";

/// What a tree holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TreeKind {
    /// Single immutable change
    Credential,
    /// Mutable field map
    Object,
}

impl TreeKind {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Credential => "credential",
            TreeKind::Object => "object",
        }
    }
}

impl std::fmt::Display for TreeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plaintext header carried by the root change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeHeader {
    /// Space the tree belongs to
    pub space_id: SpaceId,
    /// Credential or object
    pub kind: TreeKind,
    /// Application type tag (`"profile"`, `"note"`, ...)
    pub object_type: String,
    /// Application object id
    pub object_id: String,
    /// Random salt so identical headers yield distinct tree ids
    pub nonce: [u8; 16],
}

impl TreeHeader {
    /// Header with a fresh random nonce
    pub fn new(
        space_id: SpaceId,
        kind: TreeKind,
        object_type: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        Self {
            space_id,
            kind,
            object_type: object_type.into(),
            object_id: object_id.into(),
            nonce,
        }
    }
}

/// Signed portion of a change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePayload {
    /// Present only on the root change
    pub tree_header: Option<TreeHeader>,
    /// Tree this change extends; absent on the root
    pub tree_id: Option<TreeId>,
    /// Heads observed by the author when appending
    pub previous_ids: Vec<ChangeId>,
    /// Whether `encrypted_data` holds full state rather than a delta
    pub is_snapshot: bool,
    /// Signing key of the author
    pub author: PublicKey,
    /// Read key that encrypted `encrypted_data`
    pub read_key_id: ReadKeyId,
    /// Author wall clock, informational only
    pub timestamp_ms: u64,
    /// Depth in the DAG: one more than the deepest parent
    pub order: u64,
    /// Content encrypted under the read key
    pub encrypted_data: Vec<u8>,
}

impl ChangePayload {
    /// Whether this is a tree root
    pub fn is_root(&self) -> bool {
        self.tree_header.is_some()
    }
}

/// A change as stored and exchanged: encoded payload plus signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChange {
    /// bincode-encoded [`ChangePayload`]
    pub payload: Vec<u8>,
    /// Author's signature over `payload`
    pub signature: Signature,
}

impl RawChange {
    /// Encode and sign a payload
    pub fn sign(payload: &ChangePayload, signer: &SigningKey) -> Result<Self> {
        if payload.author != signer.public_key() {
            return Err(GroveError::signature("change author does not match signer"));
        }
        let payload = bincode::serialize(payload)?;
        let signature = signer.sign(&payload);
        Ok(Self { payload, signature })
    }

    /// Content-addressed id over payload and signature
    pub fn id(&self) -> ChangeId {
        ChangeId(Hash32::of_parts(&[
            CHANGE_ID_DOMAIN,
            &self.payload,
            &self.signature.to_bytes(),
        ]))
    }

    /// Decode the payload without checking the signature
    pub fn decode(&self) -> Result<ChangePayload> {
        bincode::deserialize(&self.payload)
            .map_err(|e| GroveError::serialization(format!("malformed change payload: {e}")))
    }

    /// Decode the payload and check the author's signature
    pub fn verify(&self) -> Result<ChangePayload> {
        let payload = self.decode()?;
        payload.author.verify(&self.payload, &self.signature)?;
        Ok(payload)
    }

    /// Encode for storage or the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from storage or the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| GroveError::serialization(format!("malformed change: {e}")))
    }
}

/// Additional authenticated data binding ciphertext to its space
pub(crate) fn content_aad(space_id: &SpaceId) -> Vec<u8> {
    let mut aad = b"grove.content.v1:".to_vec();
    aad.extend_from_slice(space_id.as_str().as_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::crypto::ReadKey;
    use grove_core::{OwnerId, SpaceKind};

    fn payload(author: &SigningKey) -> ChangePayload {
        let space_id = SpaceId::derive(
            &OwnerId::new("o"),
            SpaceKind::Private,
            &SigningKey::from_bytes(&[9u8; 32]).public_key(),
        );
        ChangePayload {
            tree_header: Some(TreeHeader::new(space_id, TreeKind::Object, "note", "n1")),
            tree_id: None,
            previous_ids: Vec::new(),
            is_snapshot: true,
            author: author.public_key(),
            read_key_id: ReadKey::from_bytes([1u8; 32]).id(),
            timestamp_ms: 1,
            order: 0,
            encrypted_data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = SigningKey::generate();
        let payload = payload(&signer);
        let raw = RawChange::sign(&payload, &signer).unwrap();
        assert_eq!(raw.verify().unwrap(), payload);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = SigningKey::generate();
        let mut raw = RawChange::sign(&payload(&signer), &signer).unwrap();
        let last = raw.payload.len() - 1;
        raw.payload[last] ^= 1;
        assert!(raw.verify().is_err());
    }

    #[test]
    fn test_signer_must_be_author() {
        let author = SigningKey::generate();
        let other = SigningKey::generate();
        assert!(matches!(
            RawChange::sign(&payload(&author), &other),
            Err(GroveError::Signature { .. })
        ));
    }

    #[test]
    fn test_id_is_content_address() {
        let signer = SigningKey::generate();
        let raw = RawChange::sign(&payload(&signer), &signer).unwrap();
        let decoded = RawChange::from_bytes(&raw.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.id(), raw.id());

        let other = RawChange::sign(&payload(&signer), &signer).unwrap();
        assert_ne!(other.id(), raw.id());
    }
}
