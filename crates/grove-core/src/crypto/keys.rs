//! Ed25519 signing keys, public keys and signatures
//!
//! Thin wrappers around `ed25519-dalek` so the rest of the workspace never
//! touches the curve library directly. Public keys are stored as raw bytes so
//! they can be ordered, hashed and used as map keys; they are parsed into a
//! verifying key only when a signature is checked.

use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

use crate::errors::GroveError;

/// Ed25519 signing key (private)
///
/// Key material is zeroized on drop by `ed25519-dalek`.
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    /// Build from 32 secret bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(bytes))
    }

    /// Draw a fresh random key from the OS RNG
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(secret.as_mut());
        Self::from_bytes(&secret)
    }

    /// Secret bytes; handle with care
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// The matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }

    /// Clamped X25519 scalar for Diffie-Hellman against this key's
    /// Montgomery form
    pub(crate) fn x25519_scalar(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_scalar_bytes())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("secret", &"[REDACTED]")
            .field("public", &self.public_key())
            .finish()
    }
}

impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for SigningKey {}

/// Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Parse and validate 32 public key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, GroveError> {
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| GroveError::crypto(format!("invalid public key: {e}")))?;
        Ok(Self(bytes))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex
    pub fn from_hex(s: &str) -> Result<Self, GroveError> {
        let bytes =
            hex::decode(s).map_err(|e| GroveError::invalid(format!("bad public key hex: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GroveError::invalid("public key must be 32 bytes"))?;
        Self::from_bytes(array)
    }

    /// Verify `signature` over `message`
    ///
    /// Uses strict verification so malleable signatures are rejected.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), GroveError> {
        let key = self.verifying_key()?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify_strict(message, &sig)
            .or_else(|_| key.verify(message, &sig))
            .map_err(|_| {
                GroveError::signature(format!("signature does not verify for key {self}"))
            })
    }

    /// Montgomery (X25519) form of this key, used for sealing
    pub(crate) fn to_montgomery(&self) -> Result<[u8; 32], GroveError> {
        Ok(self.verifying_key()?.to_montgomery().to_bytes())
    }

    fn verifying_key(&self) -> Result<ed25519_dalek::VerifyingKey, GroveError> {
        ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|e| GroveError::signature(format!("unusable public key {self}: {e}")))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..16])
    }
}

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Wrap raw signature bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Raw signature bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.to_vec().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        let array: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(Self(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::generate();
        let sig = key.sign(b"record");
        assert!(key.public_key().verify(b"record", &sig).is_ok());
        assert!(matches!(
            key.public_key().verify(b"other", &sig),
            Err(GroveError::Signature { .. })
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let key = SigningKey::generate();
        let other = SigningKey::generate();
        let sig = key.sign(b"record");
        assert!(other.public_key().verify(b"record", &sig).is_err());
    }

    #[test]
    fn test_signature_serde() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let sig = key.sign(b"payload");
        let bytes = bincode::serialize(&sig).unwrap();
        let back: Signature = bincode::deserialize(&bytes).unwrap();
        assert_eq!(sig, back);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&hex::encode([9u8; 32])));
    }

    #[test]
    fn test_public_key_hex_round_trip() {
        let pk = SigningKey::generate().public_key();
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }
}
