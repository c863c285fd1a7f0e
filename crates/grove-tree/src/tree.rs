//! Decrypted tree
//!
//! [`ObjectTree`] is the in-memory result of validating a change set and
//! decrypting it against a [`TreeKeys`] projection. It is never stored:
//! key resolution happens here once, so a tree built before this replica
//! was granted a key stays undecryptable. Callers rebuild instead of
//! keeping instances around.

use grove_core::crypto::{Hash32, PublicKey, SigningKey};
use grove_core::{now_ms, ChangeId, GroveError, Result, SpaceId, TreeId};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

use crate::change::{content_aad, ChangePayload, RawChange, TreeHeader, TreeKind};
use crate::keys::TreeKeys;
use crate::validation::{head_hash, validate_tree};

/// A change with its content decrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedChange {
    /// Content address
    pub id: ChangeId,
    /// Author signing key
    pub author: PublicKey,
    /// Whether `data` is full state
    pub is_snapshot: bool,
    /// DAG depth
    pub order: u64,
    /// Author wall clock
    pub timestamp_ms: u64,
    /// Parents
    pub previous_ids: Vec<ChangeId>,
    /// Plaintext content
    pub data: Vec<u8>,
}

/// A fully validated and decrypted tree
#[derive(Debug, Clone)]
pub struct ObjectTree {
    id: TreeId,
    header: TreeHeader,
    changes: Vec<DecryptedChange>,
    heads: Vec<ChangeId>,
}

fn authorize(keys: &TreeKeys, author: &PublicKey, kind: TreeKind) -> Result<()> {
    if keys.can_author(author, kind) {
        return Ok(());
    }
    match kind {
        TreeKind::Credential => Err(GroveError::signature(format!(
            "{author} is not the registered signer of space {}",
            keys.space_id
        ))),
        TreeKind::Object => Err(GroveError::permission_denied(format!(
            "{author} may not write in space {}",
            keys.space_id
        ))),
    }
}

fn heads_of(changes: &[DecryptedChange]) -> Vec<ChangeId> {
    let referenced: BTreeSet<&ChangeId> = changes.iter().flat_map(|c| c.previous_ids.iter()).collect();
    let mut heads: Vec<ChangeId> = changes
        .iter()
        .map(|c| c.id)
        .filter(|id| !referenced.contains(id))
        .collect();
    heads.sort();
    heads
}

fn decrypt(keys: &TreeKeys, payload: &ChangePayload) -> Result<Vec<u8>> {
    let key = keys.read_key(&payload.read_key_id).ok_or_else(|| {
        GroveError::no_read_key(
            keys.space_id.as_str(),
            format!("read key {} is not granted to this replica", payload.read_key_id),
        )
    })?;
    key.decrypt(&payload.encrypted_data, &content_aad(&keys.space_id))
}

impl ObjectTree {
    /// Validate and decrypt a tree from its changes
    ///
    /// Changes by authors the ledger never allowed to write are left out,
    /// together with everything built on them. An unauthorized root fails
    /// the whole tree.
    pub fn build(space_id: &SpaceId, tree_id: &TreeId, raw: &[RawChange], keys: &TreeKeys) -> Result<Self> {
        let validated = validate_tree(space_id, tree_id, raw)?;
        let kind = validated.header.kind;

        if kind == TreeKind::Credential && validated.changes.len() != 1 {
            return Err(GroveError::invalid_tree(
                tree_id.to_hex(),
                format!("credential tree has {} changes", validated.changes.len()),
            ));
        }

        // Topological order: parents are settled before their children.
        let mut skipped: BTreeSet<ChangeId> = BTreeSet::new();
        let mut changes = Vec::with_capacity(validated.changes.len());
        for change in &validated.changes {
            if change.payload.is_root() {
                authorize(keys, &change.payload.author, kind)?;
            } else if change.payload.previous_ids.iter().any(|p| skipped.contains(p)) {
                skipped.insert(change.id);
                continue;
            } else if let Err(e) = authorize(keys, &change.payload.author, kind) {
                warn!(tree = %tree_id, change = %change.id, error = %e, "skipping unauthorized change");
                skipped.insert(change.id);
                continue;
            }
            let data = decrypt(keys, &change.payload)?;
            changes.push(DecryptedChange {
                id: change.id,
                author: change.payload.author,
                is_snapshot: change.payload.is_snapshot,
                order: change.payload.order,
                timestamp_ms: change.payload.timestamp_ms,
                previous_ids: change.payload.previous_ids.clone(),
                data,
            });
        }

        let heads = if skipped.is_empty() {
            validated.heads
        } else {
            debug!(tree = %tree_id, skipped = skipped.len(), "built tree without unauthorized changes");
            heads_of(&changes)
        };

        trace!(tree = %tree_id, changes = changes.len(), "built tree");
        Ok(Self {
            id: *tree_id,
            header: validated.header,
            changes,
            heads,
        })
    }

    /// Create a new tree whose root carries `data`
    pub fn create(header: TreeHeader, data: &[u8], signer: &SigningKey, keys: &TreeKeys) -> Result<(Self, RawChange)> {
        let author = signer.public_key();
        authorize(keys, &author, header.kind)?;
        let key = keys.current_read_key().ok_or_else(|| {
            GroveError::no_read_key(keys.space_id.as_str(), "no current read key to encrypt with")
        })?;

        let payload = ChangePayload {
            tree_header: Some(header.clone()),
            tree_id: None,
            previous_ids: Vec::new(),
            is_snapshot: true,
            author,
            read_key_id: key.id(),
            timestamp_ms: now_ms(),
            order: 0,
            encrypted_data: key.encrypt(data, &content_aad(&header.space_id))?,
        };
        let raw = RawChange::sign(&payload, signer)?;
        let id = raw.id();

        let tree = Self {
            id: TreeId::from(id),
            header,
            changes: vec![DecryptedChange {
                id,
                author,
                is_snapshot: true,
                order: 0,
                timestamp_ms: payload.timestamp_ms,
                previous_ids: Vec::new(),
                data: data.to_vec(),
            }],
            heads: vec![id],
        };
        Ok((tree, raw))
    }

    /// Append a change on top of the current heads
    ///
    /// Keys are resolved from `keys` now; the returned change must be
    /// persisted by the caller.
    pub fn add_content(
        &mut self,
        data: &[u8],
        is_snapshot: bool,
        signer: &SigningKey,
        keys: &TreeKeys,
    ) -> Result<RawChange> {
        if self.header.kind == TreeKind::Credential {
            return Err(GroveError::invalid("credential trees are immutable"));
        }
        let author = signer.public_key();
        authorize(keys, &author, self.header.kind)?;
        let key = keys.current_read_key().ok_or_else(|| {
            GroveError::no_read_key(keys.space_id.as_str(), "no current read key to encrypt with")
        })?;

        let order = self
            .changes
            .iter()
            .filter(|c| self.heads.contains(&c.id))
            .map(|c| c.order)
            .max()
            .unwrap_or_default()
            + 1;

        let payload = ChangePayload {
            tree_header: None,
            tree_id: Some(self.id),
            previous_ids: self.heads.clone(),
            is_snapshot,
            author,
            read_key_id: key.id(),
            timestamp_ms: now_ms(),
            order,
            encrypted_data: key.encrypt(data, &content_aad(&self.header.space_id))?,
        };
        let raw = RawChange::sign(&payload, signer)?;
        let id = raw.id();

        self.changes.push(DecryptedChange {
            id,
            author,
            is_snapshot,
            order,
            timestamp_ms: payload.timestamp_ms,
            previous_ids: payload.previous_ids,
            data: data.to_vec(),
        });
        self.heads = vec![id];
        Ok(raw)
    }

    /// Tree id
    pub fn id(&self) -> &TreeId {
        &self.id
    }

    /// Root header
    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    /// Changes in topological order, root first
    pub fn changes(&self) -> &[DecryptedChange] {
        &self.changes
    }

    /// The root change
    pub fn root(&self) -> Option<&DecryptedChange> {
        self.changes.first()
    }

    /// Current heads, sorted
    pub fn heads(&self) -> &[ChangeId] {
        &self.heads
    }

    /// Digest of the current heads
    pub fn head_hash(&self) -> Hash32 {
        head_hash(&self.heads)
    }

    /// Number of changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the tree has no changes (never true for a built tree)
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Non-snapshot changes after the most recent snapshot
    pub fn changes_since_snapshot(&self) -> usize {
        self.changes
            .iter()
            .rev()
            .take_while(|c| !c.is_snapshot)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::crypto::ReadKey;
    use grove_core::{OwnerId, SpaceKind};

    struct Fixture {
        space_id: SpaceId,
        owner: SigningKey,
        keys: TreeKeys,
    }

    fn fixture() -> Fixture {
        let owner = SigningKey::generate();
        let space_id = SpaceId::derive(&OwnerId::new("o"), SpaceKind::Private, &owner.public_key());
        let keys = TreeKeys::empty(space_id.clone(), owner.public_key())
            .with_read_key(ReadKey::generate(), true);
        Fixture {
            space_id,
            owner,
            keys,
        }
    }

    fn header(f: &Fixture, kind: TreeKind) -> TreeHeader {
        TreeHeader::new(f.space_id.clone(), kind, "note", "n1")
    }

    #[test]
    fn test_create_then_rebuild() {
        let f = fixture();
        let (mut tree, root) = ObjectTree::create(header(&f, TreeKind::Object), b"v0", &f.owner, &f.keys).unwrap();
        let second = tree.add_content(b"v1", false, &f.owner, &f.keys).unwrap();

        let rebuilt = ObjectTree::build(&f.space_id, tree.id(), &[second, root], &f.keys).unwrap();
        let data: Vec<&[u8]> = rebuilt.changes().iter().map(|c| c.data.as_slice()).collect();
        assert_eq!(data, vec![b"v0".as_slice(), b"v1".as_slice()]);
        assert_eq!(rebuilt.heads(), tree.heads());
        assert_eq!(rebuilt.head_hash(), tree.head_hash());
        assert_eq!(rebuilt.changes_since_snapshot(), 1);
    }

    #[test]
    fn test_build_without_key_is_no_read_key() {
        let f = fixture();
        let (tree, root) = ObjectTree::create(header(&f, TreeKind::Object), b"secret", &f.owner, &f.keys).unwrap();

        let keyless = TreeKeys::empty(f.space_id.clone(), f.owner.public_key());
        let err = ObjectTree::build(&f.space_id, tree.id(), &[root], &keyless).unwrap_err();
        assert!(matches!(err, GroveError::NoReadKey { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_non_writer_cannot_append() {
        let f = fixture();
        let (mut tree, _) = ObjectTree::create(header(&f, TreeKind::Object), b"v0", &f.owner, &f.keys).unwrap();
        let stranger = SigningKey::generate();
        assert!(matches!(
            tree.add_content(b"x", false, &stranger, &f.keys),
            Err(GroveError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_unauthorized_changes_and_descendants_are_skipped() {
        let f = fixture();
        let stranger = SigningKey::generate();
        let lenient = f.keys.clone().with_writer(stranger.public_key());
        let (tree, root) = ObjectTree::create(header(&f, TreeKind::Object), b"v0", &f.owner, &f.keys).unwrap();

        let mut honest = tree.clone();
        let kept = honest.add_content(b"ok", false, &f.owner, &f.keys).unwrap();

        let mut forged = tree.clone();
        let bad = forged.add_content(b"bad", false, &stranger, &lenient).unwrap();
        let child = forged.add_content(b"child", false, &f.owner, &f.keys).unwrap();

        let built = ObjectTree::build(&f.space_id, tree.id(), &[root, kept.clone(), bad, child], &f.keys).unwrap();
        let data: Vec<&[u8]> = built.changes().iter().map(|c| c.data.as_slice()).collect();
        assert_eq!(data, vec![b"v0".as_slice(), b"ok".as_slice()]);
        assert_eq!(built.heads(), &[kept.id()]);
    }

    #[test]
    fn test_unauthorized_root_fails_the_tree() {
        let f = fixture();
        let stranger = SigningKey::generate();
        let lenient = f.keys.clone().with_writer(stranger.public_key());
        let (tree, root) = ObjectTree::create(header(&f, TreeKind::Object), b"v0", &stranger, &lenient).unwrap();
        assert!(matches!(
            ObjectTree::build(&f.space_id, tree.id(), &[root], &f.keys),
            Err(GroveError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_credential_requires_owner_and_is_immutable() {
        let f = fixture();
        let stranger = SigningKey::generate();
        let keys = f.keys.clone().with_writer(stranger.public_key());
        assert!(matches!(
            ObjectTree::create(header(&f, TreeKind::Credential), b"c", &stranger, &keys),
            Err(GroveError::Signature { .. })
        ));

        let (mut tree, _) = ObjectTree::create(header(&f, TreeKind::Credential), b"c", &f.owner, &keys).unwrap();
        assert!(tree.add_content(b"c2", false, &f.owner, &keys).is_err());
    }

    #[test]
    fn test_concurrent_heads_merge() {
        let f = fixture();
        let (tree, root) = ObjectTree::create(header(&f, TreeKind::Object), b"v0", &f.owner, &f.keys).unwrap();

        let mut left = tree.clone();
        let mut right = tree.clone();
        let a = left.add_content(b"a", false, &f.owner, &f.keys).unwrap();
        let b = right.add_content(b"b", false, &f.owner, &f.keys).unwrap();

        let mut merged =
            ObjectTree::build(&f.space_id, tree.id(), &[root.clone(), a.clone(), b.clone()], &f.keys).unwrap();
        assert_eq!(merged.heads().len(), 2);

        let c = merged.add_content(b"c", false, &f.owner, &f.keys).unwrap();
        let rebuilt = ObjectTree::build(&f.space_id, tree.id(), &[root, a, b, c], &f.keys).unwrap();
        assert_eq!(rebuilt.heads().len(), 1);
        assert_eq!(rebuilt.changes().last().map(|c| c.order), Some(2));
    }
}
