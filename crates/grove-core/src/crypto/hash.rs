//! Content-addressing hash
//!
//! Hashing is pure and synchronous, so it sits outside the effect traits.
//! Tree ids, change ids, ledger record ids and space ids all flow through
//! [`hash`] so the algorithm is chosen in exactly one place.
//!
//! Current algorithm: **SHA-256** (32-byte output).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::errors::GroveError;

/// Hash arbitrary bytes to a 32-byte digest.
#[inline]
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash several byte slices as one message.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` never
/// collide.
pub fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// A 32-byte content hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// Wrap raw digest bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash `data` with the global algorithm
    pub fn of(data: &[u8]) -> Self {
        Self(hash(data))
    }

    /// Hash length-prefixed parts with the global algorithm
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        Self(hash_parts(parts))
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self, GroveError> {
        let bytes = hex::decode(s).map_err(|e| GroveError::invalid(format!("bad hash hex: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GroveError::invalid("hash must be 32 bytes"))?;
        Ok(Self(array))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Hash32 {
    type Err = GroveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}
