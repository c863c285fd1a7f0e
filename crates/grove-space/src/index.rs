//! Replica index
//!
//! Per-space metadata about every tree the replica holds: ids, type,
//! heads and validity. The index never holds decrypted content. It is a
//! two-level sharded map so readers of one space never contend with
//! writers of another.

use dashmap::DashMap;
use grove_core::crypto::Hash32;
use grove_core::{ChangeId, SpaceId, TreeId};
use grove_tree::{head_hash, TreeKind, ValidatedTree};
use std::collections::BTreeMap;

/// Validity of an indexed tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Last validation succeeded
    Valid,
    /// Validation failed; reads return this reason until the tree is replaced
    Invalid {
        /// Validation failure
        reason: String,
    },
}

/// Index metadata for one tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectIndexEntry {
    /// Tree id
    pub tree_id: TreeId,
    /// Application object id from the root header
    pub object_id: String,
    /// Object or credential type from the root header
    pub object_type: String,
    /// Tree kind, unknown when the tree never validated
    pub tree_kind: Option<TreeKind>,
    /// Heads at the last successful validation
    pub heads: Vec<ChangeId>,
    /// Digest of `heads`
    pub last_known_head_hash: Hash32,
    /// Validity
    pub status: EntryStatus,
}

impl ObjectIndexEntry {
    /// Entry describing a structurally valid tree
    pub fn from_validated(tree: &ValidatedTree) -> Self {
        Self {
            tree_id: tree.tree_id,
            object_id: tree.header.object_id.clone(),
            object_type: tree.header.object_type.clone(),
            tree_kind: Some(tree.header.kind),
            heads: tree.heads.clone(),
            last_known_head_hash: tree.head_hash(),
            status: EntryStatus::Valid,
        }
    }

    /// Whether the last validation succeeded
    pub fn is_valid(&self) -> bool {
        self.status == EntryStatus::Valid
    }
}

/// Sharded per-space tree index
#[derive(Debug, Default)]
pub struct SpaceIndex {
    spaces: DashMap<SpaceId, DashMap<TreeId, ObjectIndexEntry>>,
}

impl SpaceIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn upsert(&self, space_id: &SpaceId, entry: ObjectIndexEntry) {
        self.spaces
            .entry(space_id.clone())
            .or_default()
            .insert(entry.tree_id, entry);
    }

    /// Mark a tree invalid, keeping whatever metadata is already known
    pub fn mark_invalid(&self, space_id: &SpaceId, tree_id: &TreeId, reason: impl Into<String>) {
        let reason = reason.into();
        let space = self.spaces.entry(space_id.clone()).or_default();
        let mut entry = space.entry(*tree_id).or_insert_with(|| ObjectIndexEntry {
            tree_id: *tree_id,
            object_id: String::new(),
            object_type: String::new(),
            tree_kind: None,
            heads: Vec::new(),
            last_known_head_hash: head_hash(&[]),
            status: EntryStatus::Valid,
        });
        entry.status = EntryStatus::Invalid { reason };
    }

    /// Entry for one tree
    pub fn get(&self, space_id: &SpaceId, tree_id: &TreeId) -> Option<ObjectIndexEntry> {
        self.spaces
            .get(space_id)
            .and_then(|space| space.get(tree_id).map(|e| e.value().clone()))
    }

    /// Every entry of a space, ordered by tree id
    pub fn entries(&self, space_id: &SpaceId) -> Vec<ObjectIndexEntry> {
        let Some(space) = self.spaces.get(space_id) else {
            return Vec::new();
        };
        let mut entries: Vec<_> = space.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.tree_id);
        entries
    }

    /// Entries of `kind` whose header type is `object_type`
    pub fn by_type(&self, space_id: &SpaceId, kind: TreeKind, object_type: &str) -> Vec<ObjectIndexEntry> {
        self.entries(space_id)
            .into_iter()
            .filter(|e| e.tree_kind == Some(kind) && e.object_type == object_type)
            .collect()
    }

    /// Entries of `kind`, valid or not
    pub fn by_kind(&self, space_id: &SpaceId, kind: TreeKind) -> Vec<ObjectIndexEntry> {
        self.entries(space_id)
            .into_iter()
            .filter(|e| e.tree_kind == Some(kind))
            .collect()
    }

    /// Number of valid trees in a space
    pub fn tree_count(&self, space_id: &SpaceId) -> usize {
        self.spaces
            .get(space_id)
            .map(|space| space.iter().filter(|e| e.is_valid()).count())
            .unwrap_or_default()
    }

    /// Head digest of every valid tree, the content summary exchanged
    /// during reconciliation
    pub fn digest(&self, space_id: &SpaceId) -> BTreeMap<TreeId, Hash32> {
        self.spaces
            .get(space_id)
            .map(|space| {
                space
                    .iter()
                    .filter(|e| e.is_valid())
                    .map(|e| (*e.key(), e.last_known_head_hash))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::{OwnerId, SpaceKind};

    fn space() -> SpaceId {
        let key = grove_core::SigningKey::generate().public_key();
        SpaceId::derive(&OwnerId::new("o"), SpaceKind::Private, &key)
    }

    fn entry(byte: u8, kind: TreeKind, object_type: &str) -> ObjectIndexEntry {
        let head = ChangeId(Hash32::of(&[byte]));
        ObjectIndexEntry {
            tree_id: TreeId(Hash32::of(&[byte])),
            object_id: format!("obj-{byte}"),
            object_type: object_type.to_string(),
            tree_kind: Some(kind),
            heads: vec![head],
            last_known_head_hash: head_hash(&[head]),
            status: EntryStatus::Valid,
        }
    }

    #[test]
    fn test_mark_invalid_keeps_metadata() {
        let index = SpaceIndex::new();
        let space = space();
        let e = entry(1, TreeKind::Object, "note");
        index.upsert(&space, e.clone());
        index.mark_invalid(&space, &e.tree_id, "missing parent");

        let got = index.get(&space, &e.tree_id).unwrap();
        assert_eq!(got.object_type, "note");
        assert_eq!(
            got.status,
            EntryStatus::Invalid {
                reason: "missing parent".into()
            }
        );
        assert_eq!(index.tree_count(&space), 0);
        assert!(index.digest(&space).is_empty());
    }

    #[test]
    fn test_by_type_filters_kind_and_type() {
        let index = SpaceIndex::new();
        let space = space();
        index.upsert(&space, entry(1, TreeKind::Object, "note"));
        index.upsert(&space, entry(2, TreeKind::Object, "task"));
        index.upsert(&space, entry(3, TreeKind::Credential, "note"));

        let notes = index.by_type(&space, TreeKind::Object, "note");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].object_id, "obj-1");
        assert_eq!(index.tree_count(&space), 3);
    }

    #[test]
    fn test_unknown_space_is_empty() {
        let index = SpaceIndex::new();
        assert!(index.entries(&space()).is_empty());
        assert_eq!(index.tree_count(&space()), 0);
    }
}
