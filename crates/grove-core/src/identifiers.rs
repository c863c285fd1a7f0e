//! Identifier types
//!
//! Space ids are a pure function of `(owner, kind, master public key)` so a
//! crashed replica can re-derive the same space. Tree, change and ledger
//! record ids are content hashes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{Hash32, PublicKey};
use crate::errors::GroveError;

/// Number of hash bytes rendered in a space id
const SPACE_ID_HASH_BYTES: usize = 20;

/// Kind of space; part of the space id derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpaceKind {
    /// Single-account space holding personal objects and credentials
    Private,
    /// Shared space where members may write
    Community,
    /// Shared space where only the owner and admins write
    CommunityReadOnly,
    /// Administrative space
    Admin,
}

impl SpaceKind {
    /// All kinds, in id-suffix order
    pub const ALL: [SpaceKind; 4] = [
        SpaceKind::Private,
        SpaceKind::Community,
        SpaceKind::CommunityReadOnly,
        SpaceKind::Admin,
    ];

    /// Stable string form used in ids and config
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceKind::Private => "private",
            SpaceKind::Community => "community",
            SpaceKind::CommunityReadOnly => "community-readonly",
            SpaceKind::Admin => "admin",
        }
    }
}

impl fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceKind {
    type Err = GroveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpaceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| GroveError::invalid(format!("unknown space kind '{s}'")))
    }
}

/// Opaque owner identifier issued by the identity subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an identifier string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Space identifier, `<hex>.<kind>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId(String);

impl SpaceId {
    /// Derive the id for `(owner, kind, master)`
    pub fn derive(owner: &OwnerId, kind: SpaceKind, master: &PublicKey) -> Self {
        let digest = Hash32::of_parts(&[
            b"grove.space.v1",
            owner.as_str().as_bytes(),
            kind.as_str().as_bytes(),
            master.as_bytes(),
        ]);
        let prefix = hex::encode(&digest.as_bytes()[..SPACE_ID_HASH_BYTES]);
        Self(format!("{prefix}.{kind}"))
    }

    /// Borrow the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind encoded in the id suffix
    pub fn kind(&self) -> Result<SpaceKind, GroveError> {
        let (_, suffix) = self
            .0
            .split_once('.')
            .ok_or_else(|| GroveError::invalid(format!("malformed space id '{}'", self.0)))?;
        suffix.parse()
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SpaceId {
    type Err = GroveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, suffix) = s
            .split_once('.')
            .ok_or_else(|| GroveError::invalid(format!("malformed space id '{s}'")))?;
        if prefix.len() != SPACE_ID_HASH_BYTES * 2 || hex::decode(prefix).is_err() {
            return Err(GroveError::invalid(format!("malformed space id '{s}'")));
        }
        suffix.parse::<SpaceKind>()?;
        Ok(Self(s.to_string()))
    }
}

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Hash32);

        impl $name {
            /// Borrow the underlying hash
            pub fn hash(&self) -> &Hash32 {
                &self.0
            }

            /// Lowercase hex encoding
            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), &self.0.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = GroveError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Hash32::from_hex(s)?))
            }
        }
    };
}

hash_id!(
    /// Tree identifier: hash of the tree's root change
    TreeId,
    "TreeId"
);
hash_id!(
    /// Change identifier: hash of the signed change bytes
    ChangeId,
    "ChangeId"
);
hash_id!(
    /// Ledger record identifier: hash of the signed record bytes
    RecordId,
    "RecordId"
);

impl From<ChangeId> for TreeId {
    fn from(root: ChangeId) -> Self {
        TreeId(root.0)
    }
}

/// Peer identifier on the replication transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a peer name
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the peer name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
