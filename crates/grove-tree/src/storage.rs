//! Persistent tree store
//!
//! Changes are stored one per key under
//! `space/<space>/tree/<tree>/change/<change>`. The store holds only
//! signed, encrypted bytes; it is the single source of truth and keeps no
//! handles open between calls.

use grove_core::effects::StorageEffects;
use grove_core::{ChangeId, Result, SpaceId, TreeId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::change::RawChange;
use crate::validation::{validate_tree, ValidatedTree};

/// Tree persistence over a storage backend
#[derive(Clone)]
pub struct TreeStore {
    storage: Arc<dyn StorageEffects>,
}

impl std::fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStore").finish_non_exhaustive()
    }
}

fn space_prefix(space_id: &SpaceId) -> String {
    format!("space/{space_id}/tree/")
}

fn tree_prefix(space_id: &SpaceId, tree_id: &TreeId) -> String {
    format!("space/{space_id}/tree/{}/change/", tree_id.to_hex())
}

fn change_key(space_id: &SpaceId, tree_id: &TreeId, change_id: &ChangeId) -> String {
    format!("{}{}", tree_prefix(space_id, tree_id), change_id.to_hex())
}

impl TreeStore {
    /// Wrap a storage backend
    pub fn new(storage: Arc<dyn StorageEffects>) -> Self {
        Self { storage }
    }

    /// Ids of every tree stored for `space_id`
    pub async fn list_tree_ids(&self, space_id: &SpaceId) -> Result<Vec<TreeId>> {
        let prefix = space_prefix(space_id);
        let mut ids = BTreeSet::new();
        for key in self.storage.list_keys(Some(&prefix)).await? {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((tree, _)) = rest.split_once('/') else {
                continue;
            };
            if let Ok(id) = tree.parse::<TreeId>() {
                ids.insert(id);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Whether any change of `tree_id` is stored
    pub async fn has_tree(&self, space_id: &SpaceId, tree_id: &TreeId) -> Result<bool> {
        let root_key = change_key(space_id, tree_id, &ChangeId(tree_id.0));
        Ok(self.storage.exists(&root_key).await?)
    }

    /// Every stored change of `tree_id`, unordered
    pub async fn load_changes(&self, space_id: &SpaceId, tree_id: &TreeId) -> Result<Vec<RawChange>> {
        let mut changes = Vec::new();
        for key in self.storage.list_keys(Some(&tree_prefix(space_id, tree_id))).await? {
            if let Some(bytes) = self.storage.retrieve(&key).await? {
                changes.push(RawChange::from_bytes(&bytes)?);
            }
        }
        Ok(changes)
    }

    /// Load and structurally validate a tree without decrypting it
    pub async fn load_validated(&self, space_id: &SpaceId, tree_id: &TreeId) -> Result<ValidatedTree> {
        let changes = self.load_changes(space_id, tree_id).await?;
        validate_tree(space_id, tree_id, &changes)
    }

    /// Persist changes, skipping ones already stored; returns how many
    /// were new
    pub async fn put_changes(&self, space_id: &SpaceId, tree_id: &TreeId, changes: &[RawChange]) -> Result<usize> {
        let mut batch = Vec::new();
        for change in changes {
            let key = change_key(space_id, tree_id, &change.id());
            if self.storage.exists(&key).await? {
                continue;
            }
            batch.push((key, change.to_bytes()?));
        }
        let added = batch.len();
        if added > 0 {
            self.storage.store_batch(batch).await?;
            debug!(space = %space_id, tree = %tree_id, added, "stored changes");
        }
        Ok(added)
    }

    /// Changes a peer holding `known_heads` is missing
    pub async fn changes_since(
        &self,
        space_id: &SpaceId,
        tree_id: &TreeId,
        known_heads: &[ChangeId],
    ) -> Result<Vec<RawChange>> {
        let tree = self.load_validated(space_id, tree_id).await?;
        Ok(tree.changes_after(known_heads))
    }
}
