//! Structural validation
//!
//! Checks everything about a tree that does not need the read key: every
//! signature, content addresses, a single root whose id is the tree id,
//! parent links and DAG depth. Sync uses this to accept or reject a remote
//! tree before it is ever decrypted.
//!
//! Because `order` is strictly one more than the deepest parent, sorting by
//! `(order, change id)` is a deterministic topological order.

use grove_core::crypto::Hash32;
use grove_core::{ChangeId, GroveError, Result, SpaceId, TreeId};
use std::collections::{BTreeMap, BTreeSet};

use crate::change::{ChangePayload, RawChange, TreeHeader};

/// A change that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedChange {
    /// Content address
    pub id: ChangeId,
    /// Decoded payload
    pub payload: ChangePayload,
    /// Original signed bytes
    pub raw: RawChange,
}

/// A tree whose structure and signatures check out
#[derive(Debug, Clone)]
pub struct ValidatedTree {
    /// Tree id (root change id)
    pub tree_id: TreeId,
    /// Root header
    pub header: TreeHeader,
    /// Changes in topological order, root first
    pub changes: Vec<ValidatedChange>,
    /// Changes no other change builds on, sorted
    pub heads: Vec<ChangeId>,
}

/// Digest of a head set, used to compare replicas cheaply
pub fn head_hash(heads: &[ChangeId]) -> Hash32 {
    let mut sorted: Vec<&ChangeId> = heads.iter().collect();
    sorted.sort();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(sorted.len() + 1);
    parts.push(b"grove.heads.v1");
    for head in &sorted {
        parts.push(head.0.as_bytes());
    }
    Hash32::of_parts(&parts)
}

impl ValidatedTree {
    /// Digest of the current heads
    pub fn head_hash(&self) -> Hash32 {
        head_hash(&self.heads)
    }

    /// Changes that are not `known` heads or their ancestors, in
    /// topological order. Unknown ids in `known` are ignored.
    pub fn changes_after(&self, known: &[ChangeId]) -> Vec<RawChange> {
        let parents: BTreeMap<ChangeId, &[ChangeId]> = self
            .changes
            .iter()
            .map(|c| (c.id, c.payload.previous_ids.as_slice()))
            .collect();

        let mut seen = BTreeSet::new();
        let mut stack: Vec<ChangeId> = known
            .iter()
            .filter(|id| parents.contains_key(id))
            .copied()
            .collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(previous) = parents.get(&id) {
                stack.extend(previous.iter().copied());
            }
        }

        self.changes
            .iter()
            .filter(|c| !seen.contains(&c.id))
            .map(|c| c.raw.clone())
            .collect()
    }
}

/// Validate the full change set of `tree_id` in `space_id`
pub fn validate_tree(space_id: &SpaceId, tree_id: &TreeId, raw: &[RawChange]) -> Result<ValidatedTree> {
    let invalid = |message: String| GroveError::invalid_tree(tree_id.to_hex(), message);

    if raw.is_empty() {
        return Err(invalid("tree has no changes".to_string()));
    }

    let mut by_id: BTreeMap<ChangeId, ValidatedChange> = BTreeMap::new();
    for change in raw {
        let id = change.id();
        if by_id.contains_key(&id) {
            continue;
        }
        let payload = change.decode().map_err(|e| invalid(e.to_string()))?;
        payload
            .author
            .verify(&change.payload, &change.signature)
            .map_err(|_| {
                GroveError::signature(format!("change {id} in tree {tree_id} has a bad signature"))
            })?;
        by_id.insert(
            id,
            ValidatedChange {
                id,
                payload,
                raw: change.clone(),
            },
        );
    }

    // Root
    let mut roots = by_id.values().filter(|c| c.payload.is_root());
    let root = roots
        .next()
        .ok_or_else(|| invalid("missing root change".to_string()))?;
    if roots.next().is_some() {
        return Err(invalid("more than one root change".to_string()));
    }
    if TreeId::from(root.id) != *tree_id {
        return Err(invalid("root change does not hash to the tree id".to_string()));
    }
    let header = root
        .payload
        .tree_header
        .clone()
        .ok_or_else(|| invalid("root change without header".to_string()))?;
    if header.space_id != *space_id {
        return Err(invalid(format!("tree belongs to space {}", header.space_id)));
    }
    if !root.payload.previous_ids.is_empty() || root.payload.order != 0 || root.payload.tree_id.is_some() {
        return Err(invalid("root change must have no parents and order 0".to_string()));
    }
    if !root.payload.is_snapshot {
        return Err(invalid("root change must be a snapshot".to_string()));
    }

    // Links
    let mut referenced = BTreeSet::new();
    for change in by_id.values().filter(|c| !c.payload.is_root()) {
        let payload = &change.payload;
        if payload.tree_id != Some(*tree_id) {
            return Err(invalid(format!("change {} names another tree", change.id)));
        }
        if payload.previous_ids.is_empty() {
            return Err(invalid(format!("change {} has no parents", change.id)));
        }
        let mut max_parent_order = 0;
        let mut unique = BTreeSet::new();
        for parent in &payload.previous_ids {
            if !unique.insert(parent) {
                return Err(invalid(format!("change {} repeats a parent", change.id)));
            }
            let parent_change = by_id.get(parent).ok_or_else(|| {
                invalid(format!("change {} references missing parent {parent}", change.id))
            })?;
            max_parent_order = max_parent_order.max(parent_change.payload.order);
            referenced.insert(*parent);
        }
        if payload.order != max_parent_order + 1 {
            return Err(invalid(format!(
                "change {} has order {} but its deepest parent has order {max_parent_order}",
                change.id, payload.order
            )));
        }
    }

    let heads: Vec<ChangeId> = by_id
        .keys()
        .filter(|id| !referenced.contains(id))
        .copied()
        .collect();

    let mut changes: Vec<ValidatedChange> = by_id.into_values().collect();
    changes.sort_by(|a, b| (a.payload.order, a.id).cmp(&(b.payload.order, b.id)));

    Ok(ValidatedTree {
        tree_id: *tree_id,
        header,
        changes,
        heads,
    })
}
