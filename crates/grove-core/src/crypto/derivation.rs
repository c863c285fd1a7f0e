//! Deterministic key derivation from a recovery seed
//!
//! A [`RecoverySeed`] is extracted from a word-list mnemonic with
//! HKDF-SHA256. Individual Ed25519 keys are expanded from the seed with the
//! info string `grove:v1:key:<index>`, so the same seed and index always give
//! the same key, byte for byte.
//!
//! Space key triples occupy three consecutive indices:
//!
//! | key      | index       |
//! |----------|-------------|
//! | signing  | `index + 0` |
//! | master   | `index + 1` |
//! | metadata | `index + 2` |
//!
//! The space read key is deliberately *not* derivable; see
//! [`ReadKey::generate`](super::symmetric::ReadKey::generate).

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::SigningKey;
use crate::errors::GroveError;

const SEED_SALT: &[u8] = b"grove.recovery-seed.v1";

/// Minimum number of words accepted in a mnemonic phrase
pub const MIN_MNEMONIC_WORDS: usize = 12;

/// 64-byte recovery seed
#[derive(Clone)]
pub struct RecoverySeed(Zeroizing<[u8; 64]>);

impl RecoverySeed {
    /// Extract a seed from a word-list mnemonic
    ///
    /// Words are lowercased and joined by single spaces before extraction, so
    /// incidental whitespace and case differences do not change the seed.
    pub fn from_phrase(phrase: &str) -> Result<Self, GroveError> {
        let words: Vec<String> = phrase
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        if words.len() < MIN_MNEMONIC_WORDS {
            return Err(GroveError::invalid(format!(
                "mnemonic needs at least {MIN_MNEMONIC_WORDS} words, got {}",
                words.len()
            )));
        }
        let normalized = Zeroizing::new(words.join(" "));

        let hkdf = Hkdf::<Sha256>::new(Some(SEED_SALT), normalized.as_bytes());
        let mut seed = Zeroizing::new([0u8; 64]);
        hkdf.expand(b"grove:v1:seed", seed.as_mut())
            .map_err(|e| GroveError::crypto(format!("seed expansion failed: {e:?}")))?;
        Ok(Self(seed))
    }

    /// Wrap raw seed bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the seed bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Debug for RecoverySeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoverySeed([REDACTED])")
    }
}

/// Derive the Ed25519 key at `index`
pub fn derive_signing_key(seed: &RecoverySeed, index: u32) -> Result<SigningKey, GroveError> {
    let hkdf = Hkdf::<Sha256>::new(None, seed.as_bytes());
    let info = format!("grove:v1:key:{index}");
    let mut secret = Zeroizing::new([0u8; 32]);
    hkdf.expand(info.as_bytes(), secret.as_mut())
        .map_err(|e| GroveError::crypto(format!("key expansion failed: {e:?}")))?;
    Ok(SigningKey::from_bytes(&secret))
}

/// The deterministic part of a space key set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceKeyTriple {
    /// Signs tree changes and ledger records; the replica's member identity
    pub signing: SigningKey,
    /// Signs the space header
    pub master: SigningKey,
    /// Receives sealed owner metadata
    pub metadata: SigningKey,
}

impl SpaceKeyTriple {
    /// Derive the triple rooted at `index`
    pub fn derive(seed: &RecoverySeed, index: u32) -> Result<Self, GroveError> {
        let last = index
            .checked_add(2)
            .ok_or_else(|| GroveError::invalid(format!("derivation index {index} overflows")))?;
        Ok(Self {
            signing: derive_signing_key(seed, index)?,
            master: derive_signing_key(seed, index + 1)?,
            metadata: derive_signing_key(seed, last)?,
        })
    }

    /// Random triple for replicas that have no seed (tests, ephemeral peers)
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(),
            master: SigningKey::generate(),
            metadata: SigningKey::generate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "abandon ability able about above absent absorb abstract absurd abuse access accident";

    #[test]
    fn test_same_seed_same_key() {
        let seed = RecoverySeed::from_phrase(PHRASE).unwrap();
        let k1 = derive_signing_key(&seed, 0).unwrap();
        let k2 = derive_signing_key(&seed, 0).unwrap();
        assert_eq!(*k1.to_bytes(), *k2.to_bytes());
    }

    #[test]
    fn test_phrase_normalization() {
        let a = RecoverySeed::from_phrase(PHRASE).unwrap();
        let b = RecoverySeed::from_phrase(&format!("  {}  ", PHRASE.to_uppercase())).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_short_phrase_rejected() {
        assert!(matches!(
            RecoverySeed::from_phrase("too short"),
            Err(GroveError::Invalid { .. })
        ));
    }

    #[test]
    fn test_triple_uses_consecutive_indices() {
        let seed = RecoverySeed::from_phrase(PHRASE).unwrap();
        let triple = SpaceKeyTriple::derive(&seed, 3).unwrap();
        assert_eq!(triple.signing, derive_signing_key(&seed, 3).unwrap());
        assert_eq!(triple.master, derive_signing_key(&seed, 4).unwrap());
        assert_eq!(triple.metadata, derive_signing_key(&seed, 5).unwrap());
        assert_ne!(triple.signing, triple.master);
    }

    #[test]
    fn test_index_overflow() {
        let seed = RecoverySeed::from_bytes([1u8; 64]);
        assert!(SpaceKeyTriple::derive(&seed, u32::MAX - 1).is_err());
    }
}
