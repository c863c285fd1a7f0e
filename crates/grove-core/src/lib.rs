//! # Grove Core
//!
//! Foundation types shared by every Grove crate:
//!
//! - [`errors`]: the unified [`GroveError`] taxonomy
//! - [`identifiers`]: space, tree, change, ledger record and peer ids
//! - [`crypto`]: hashing, Ed25519 signing, read-key encryption, sealed boxes
//!   and seed-based key derivation
//! - [`config`]: replica configuration loaded from TOML and the environment
//! - [`effects`]: the storage effect trait implemented by `grove-store`
//!
//! Nothing in this crate performs network I/O.

#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod effects;
pub mod errors;
pub mod identifiers;

pub use config::GroveConfig;
pub use crypto::{Hash32, PublicKey, ReadKey, ReadKeyId, RecoverySeed, Signature, SigningKey, SpaceKeyTriple};
pub use effects::{StorageEffects, StorageError};
pub use errors::{GroveError, Result};
pub use identifiers::{ChangeId, OwnerId, PeerId, RecordId, SpaceId, SpaceKind, TreeId};

/// Milliseconds since the Unix epoch, saturating to zero on clock skew
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
