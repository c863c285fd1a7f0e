//! Sealed boxes addressed to an Ed25519 public key
//!
//! Used for ledger-mediated key exchange: read keys are sealed to a member's
//! signing key (or to a one-off invite key) and owner metadata is sealed to
//! the space metadata key.
//!
//! Construction: the recipient's Ed25519 key is mapped to its X25519
//! (Montgomery) form, an ephemeral X25519 secret performs Diffie-Hellman,
//! HKDF-SHA256 turns the shared secret into a one-time ChaCha20-Poly1305 key.
//!
//! Layout: `ephemeral_public (32) || nonce (12) || ciphertext`.

use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::keys::{PublicKey, SigningKey};
use super::symmetric::ReadKey;
use crate::errors::GroveError;

const EPHEMERAL_LEN: usize = 32;
const SEAL_INFO: &[u8] = b"grove.seal.v1";

fn box_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Result<ReadKey, GroveError> {
    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral), shared);
    let mut okm = Zeroizing::new([0u8; 32]);
    let mut info = Vec::with_capacity(SEAL_INFO.len() + 32);
    info.extend_from_slice(SEAL_INFO);
    info.extend_from_slice(recipient);
    hkdf.expand(&info, okm.as_mut())
        .map_err(|e| GroveError::crypto(format!("seal key expansion failed: {e:?}")))?;
    Ok(ReadKey::from_bytes(*okm))
}

/// Seal `plaintext` so only the holder of `recipient`'s signing key can open it
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, GroveError> {
    let recipient_mont = recipient.to_montgomery()?;

    let mut ephemeral_secret = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(ephemeral_secret.as_mut());
    let ephemeral_public = MontgomeryPoint::mul_base_clamped(*ephemeral_secret).to_bytes();
    let shared = Zeroizing::new(
        MontgomeryPoint(recipient_mont)
            .mul_clamped(*ephemeral_secret)
            .to_bytes(),
    );

    let key = box_key(&shared, &ephemeral_public, &recipient_mont)?;
    let body = key.encrypt(plaintext, &ephemeral_public)?;

    let mut out = Vec::with_capacity(EPHEMERAL_LEN + body.len());
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Open a box sealed to `recipient`'s public key
pub fn open(recipient: &SigningKey, sealed: &[u8]) -> Result<Vec<u8>, GroveError> {
    if sealed.len() < EPHEMERAL_LEN {
        return Err(GroveError::crypto("sealed box too short"));
    }
    let (ephemeral, body) = sealed.split_at(EPHEMERAL_LEN);
    let ephemeral: [u8; 32] = ephemeral
        .try_into()
        .map_err(|_| GroveError::crypto("bad ephemeral key"))?;

    let recipient_mont = recipient.public_key().to_montgomery()?;
    let shared = Zeroizing::new(
        MontgomeryPoint(ephemeral)
            .mul_clamped(*recipient.x25519_scalar())
            .to_bytes(),
    );

    let key = box_key(&shared, &ephemeral, &recipient_mont)?;
    key.decrypt(body, &ephemeral)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let recipient = SigningKey::generate();
        let sealed = seal(&recipient.public_key(), b"read-key-bytes").unwrap();
        assert_eq!(open(&recipient, &sealed).unwrap(), b"read-key-bytes");
    }

    #[test]
    fn test_other_key_cannot_open() {
        let recipient = SigningKey::generate();
        let intruder = SigningKey::generate();
        let sealed = seal(&recipient.public_key(), b"secret").unwrap();
        assert!(open(&intruder, &sealed).is_err());
    }

    #[test]
    fn test_sealing_is_randomized() {
        let recipient = SigningKey::generate();
        let a = seal(&recipient.public_key(), b"secret").unwrap();
        let b = seal(&recipient.public_key(), b"secret").unwrap();
        assert_ne!(a, b);
    }
}
