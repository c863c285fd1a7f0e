//! Access material a tree is built against
//!
//! [`TreeKeys`] is a point-in-time projection of the permission ledger:
//! which read keys this replica holds and who may author changes. A tree
//! resolves keys from it exactly once, at build or append time, so the
//! projection must be taken fresh for every build.

use grove_core::crypto::{PublicKey, ReadKey, ReadKeyId};
use grove_core::SpaceId;
use std::collections::{BTreeMap, BTreeSet};

use crate::change::TreeKind;

/// Ledger-derived keys and write rights for one space
#[derive(Debug, Clone)]
pub struct TreeKeys {
    /// Space the projection was taken from
    pub space_id: SpaceId,
    /// Every read key this replica can unlock, current and rotated-out
    pub read_keys: BTreeMap<ReadKeyId, ReadKey>,
    /// Key new changes are encrypted under
    pub current: Option<ReadKeyId>,
    /// Identities that hold (or held) write permission
    pub writers: BTreeSet<PublicKey>,
    /// The space's registered signer; sole author of credential trees
    pub owner: PublicKey,
}

impl TreeKeys {
    /// Projection with no keys and no writers besides the owner
    pub fn empty(space_id: SpaceId, owner: PublicKey) -> Self {
        let mut writers = BTreeSet::new();
        writers.insert(owner);
        Self {
            space_id,
            read_keys: BTreeMap::new(),
            current: None,
            writers,
            owner,
        }
    }

    /// Add a read key, optionally making it current
    pub fn with_read_key(mut self, key: ReadKey, current: bool) -> Self {
        let id = key.id();
        self.read_keys.insert(id, key);
        if current {
            self.current = Some(id);
        }
        self
    }

    /// Add a writer
    pub fn with_writer(mut self, writer: PublicKey) -> Self {
        self.writers.insert(writer);
        self
    }

    /// Look up a read key by id
    pub fn read_key(&self, id: &ReadKeyId) -> Option<&ReadKey> {
        self.read_keys.get(id)
    }

    /// The key new changes are encrypted under
    pub fn current_read_key(&self) -> Option<&ReadKey> {
        self.current.as_ref().and_then(|id| self.read_keys.get(id))
    }

    /// Whether `author` may append to a tree of `kind`
    pub fn can_author(&self, author: &PublicKey, kind: TreeKind) -> bool {
        match kind {
            TreeKind::Credential => *author == self.owner,
            TreeKind::Object => self.writers.contains(author),
        }
    }
}
