//! Symmetric read keys
//!
//! A [`ReadKey`] encrypts every tree change in a space with
//! ChaCha20-Poly1305. Ciphertexts carry their 12-byte nonce as a prefix.
//! Read keys are random: there is no derivation path from a seed, which is
//! why they must be persisted on first generation.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::hash::Hash32;
use crate::errors::GroveError;

const NONCE_LEN: usize = 12;

/// Identifier of a read key: a domain-separated hash of the key bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReadKeyId(pub Hash32);

impl fmt::Debug for ReadKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadKeyId({})", &self.0.to_hex()[..12])
    }
}

impl fmt::Display for ReadKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex()[..16])
    }
}

/// 32-byte ChaCha20-Poly1305 key encrypting a space's tree content
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ReadKey([u8; 32]);

impl ReadKey {
    /// Draw a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GroveError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GroveError::crypto("read key must be 32 bytes"))?;
        Ok(Self(array))
    }

    /// Borrow the key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Stable identifier of this key
    pub fn id(&self) -> ReadKeyId {
        ReadKeyId(Hash32::of_parts(&[b"grove.readkey.id.v1", &self.0]))
    }

    /// Encrypt `plaintext`, binding it to `aad`
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, GroveError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| GroveError::crypto("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a nonce-prefixed ciphertext produced by [`ReadKey::encrypt`]
    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, GroveError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(GroveError::crypto("ciphertext shorter than nonce"));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|_| GroveError::crypto("decryption failed: wrong key or tampered data"))
    }
}

impl fmt::Debug for ReadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadKey")
            .field("id", &self.id())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for ReadKey {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ReadKey {}
