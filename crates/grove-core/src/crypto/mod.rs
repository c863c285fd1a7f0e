//! Cryptographic capabilities: hashing, signing, symmetric encryption,
//! sealed boxes and seed derivation.

pub mod derivation;
pub mod hash;
pub mod keys;
pub mod seal;
pub mod symmetric;

pub use derivation::{derive_signing_key, RecoverySeed, SpaceKeyTriple};
pub use hash::{hash, hash_parts, Hash32};
pub use keys::{PublicKey, Signature, SigningKey};
pub use symmetric::{ReadKey, ReadKeyId};
