use grove_core::{GroveError, Result, SpaceId, TreeId};
use grove_tree::{ObjectTree, TreeHeader, TreeKind};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::ops::{diff, replay, Fields, ObjectContent};
use crate::access::{ChangeOrigin, TreeAccess};
use crate::resolver::{Space, SpaceResolver};

/// A decrypted object
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Tree holding the object
    pub tree_id: TreeId,
    /// Application object id
    pub object_id: String,
    /// Object type
    pub object_type: String,
    /// Current fields
    pub fields: Fields,
    /// Changes after the latest snapshot
    pub changes_since_snapshot: usize,
}

/// What an update wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Fields already matched; nothing was appended
    Unchanged,
    /// A diff change was appended
    Diff {
        /// Number of field operations
        ops: usize,
    },
    /// A full snapshot was appended
    Snapshot,
}

/// Creates, updates and reads object trees
#[derive(Debug, Clone)]
pub struct ObjectManager {
    resolver: Arc<SpaceResolver>,
    access: Arc<TreeAccess>,
    snapshot_interval: usize,
}

fn decode_tree(tree: &ObjectTree) -> Result<Fields> {
    let contents = tree
        .changes()
        .iter()
        .map(|change| ObjectContent::from_bytes(&change.data))
        .collect::<Result<Vec<_>>>()?;
    Ok(replay(&contents))
}

impl ObjectManager {
    /// Manager writing a snapshot every `snapshot_interval` changes
    pub fn new(resolver: Arc<SpaceResolver>, access: Arc<TreeAccess>, snapshot_interval: u32) -> Self {
        Self {
            resolver,
            access,
            snapshot_interval: snapshot_interval.max(1) as usize,
        }
    }

    /// Create an object; the root change is a snapshot of `fields`
    pub async fn create_object(&self, space_id: &SpaceId, object_type: &str, fields: Fields) -> Result<TreeId> {
        let space = self.resolver.require(space_id)?;
        let keys = space.tree_keys().await?;
        let header = TreeHeader::new(
            space_id.clone(),
            TreeKind::Object,
            object_type,
            Uuid::new_v4().to_string(),
        );
        let data = ObjectContent::Snapshot { fields }.to_bytes()?;
        let (tree, root) = ObjectTree::create(header, &data, space.identity(), &keys)?;

        let guard = self.access.lock_tree(space_id, tree.id()).await;
        self.access
            .commit_locked(&guard, &keys, tree.id(), vec![root], ChangeOrigin::Local)
            .await?;
        info!(space = %space_id, tree = %tree.id(), object_type, "object created");
        Ok(*tree.id())
    }

    /// Replace the object's fields with `fields`
    ///
    /// Appends the minimal diff, or a snapshot when this change would be
    /// the `snapshot_interval`th since the last one. The read, diff and
    /// append happen under the tree's lock.
    pub async fn update_object(&self, space_id: &SpaceId, tree_id: &TreeId, fields: Fields) -> Result<UpdateOutcome> {
        let space = self.resolver.require(space_id)?;
        let guard = self.access.lock_tree(space_id, tree_id).await;

        let mut tree = self.access.get_tree(&space, tree_id).await?;
        if tree.header().kind != TreeKind::Object {
            return Err(GroveError::invalid(format!("tree {tree_id} is not an object tree")));
        }
        let current = decode_tree(&tree)?;
        let ops = diff(&current, &fields);
        if ops.is_empty() {
            debug!(space = %space_id, tree = %tree_id, "update is a no-op");
            return Ok(UpdateOutcome::Unchanged);
        }

        let keys = space.tree_keys().await?;
        let snapshot = tree.changes_since_snapshot() + 1 >= self.snapshot_interval;
        let (content, outcome) = if snapshot {
            (ObjectContent::Snapshot { fields }, UpdateOutcome::Snapshot)
        } else {
            let count = ops.len();
            (ObjectContent::Diff { ops }, UpdateOutcome::Diff { ops: count })
        };

        let change = tree.add_content(&content.to_bytes()?, snapshot, space.identity(), &keys)?;
        self.access
            .commit_locked(&guard, &keys, tree_id, vec![change], ChangeOrigin::Local)
            .await?;
        debug!(space = %space_id, tree = %tree_id, ?outcome, "object updated");
        Ok(outcome)
    }

    /// Current state of one object
    pub async fn read_object(&self, space_id: &SpaceId, tree_id: &TreeId) -> Result<Object> {
        let space = self.resolver.require(space_id)?;
        self.read_in(&space, tree_id).await
    }

    /// Every object of `object_type` in the space
    pub async fn read_objects_by_type(&self, space_id: &SpaceId, object_type: &str) -> Result<Vec<Object>> {
        let space = self.resolver.require(space_id)?;
        let mut objects = Vec::new();
        for entry in self.access.index().by_type(space_id, TreeKind::Object, object_type) {
            objects.push(self.read_in(&space, &entry.tree_id).await?);
        }
        Ok(objects)
    }

    async fn read_in(&self, space: &Space, tree_id: &TreeId) -> Result<Object> {
        let tree = self.access.get_tree(space, tree_id).await?;
        if tree.header().kind != TreeKind::Object {
            return Err(GroveError::invalid(format!("tree {tree_id} is not an object tree")));
        }
        Ok(Object {
            tree_id: *tree_id,
            object_id: tree.header().object_id.clone(),
            object_type: tree.header().object_type.clone(),
            fields: decode_tree(&tree)?,
            changes_since_snapshot: tree.changes_since_snapshot(),
        })
    }
}
