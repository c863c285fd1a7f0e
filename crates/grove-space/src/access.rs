//! Tree access
//!
//! Every read goes back to the tree store and the ledger: [`TreeAccess::get_tree`]
//! validates and decrypts from persisted changes against the keys the
//! ledger grants *now*. Nothing decrypted outlives the call, so a ledger
//! change between two reads is always reflected by the second one.
//!
//! Writes to a tree, local or remote, run under that tree's lock.
//! Successful writes are announced on a broadcast channel that the
//! synchronizer turns into head updates for peers.
//!
//! A rejected batch for a tree that already holds valid changes leaves the
//! tree and its index entry untouched. Only a tree with nothing stored yet
//! is marked invalid.

use dashmap::DashMap;
use grove_core::config::WaitConfig;
use grove_core::{ChangeId, GroveError, PeerId, Result, SpaceId, TreeId};
use grove_tree::{validate_tree, ObjectTree, RawChange, TreeKeys, TreeKind, TreeStore, ValidatedChange};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::index::{EntryStatus, ObjectIndexEntry, SpaceIndex};
use crate::resolver::Space;

const EVENT_CAPACITY: usize = 1024;

type LockMap = DashMap<(SpaceId, TreeId), Arc<Mutex<()>>>;

/// Exclusive access to one tree
///
/// Dropping the guard releases the lock and forgets it once nobody else
/// holds or waits for it.
pub struct TreeGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    key: (SpaceId, TreeId),
}

impl std::fmt::Debug for TreeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeGuard")
            .field("space", &self.key.0)
            .field("tree", &self.key.1)
            .finish()
    }
}

impl Drop for TreeGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Where a write came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Written by this replica
    Local,
    /// Received from a peer
    Remote(PeerId),
}

/// Announcement of new changes in a tree
#[derive(Debug, Clone)]
pub struct HeadEvent {
    /// Space
    pub space_id: SpaceId,
    /// Tree
    pub tree_id: TreeId,
    /// Heads after the write
    pub heads: Vec<ChangeId>,
    /// Changes the write added
    pub changes: Vec<RawChange>,
    /// Writer
    pub origin: ChangeOrigin,
}

/// Tree reads and writes over the store and the index
pub struct TreeAccess {
    store: TreeStore,
    index: Arc<SpaceIndex>,
    locks: Arc<LockMap>,
    events: broadcast::Sender<HeadEvent>,
    wait: WaitConfig,
}

impl std::fmt::Debug for TreeAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeAccess")
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

fn is_structural(error: &GroveError) -> bool {
    matches!(error, GroveError::InvalidTree { .. } | GroveError::Signature { .. })
}

/// Reason recorded in the index; `get_tree` adds the tree id back
fn invalid_reason(error: &GroveError) -> String {
    match error {
        GroveError::InvalidTree { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Check that every change in `incoming` has an author allowed to write
fn authorize_incoming(
    tree_id: &TreeId,
    kind: TreeKind,
    incoming: &BTreeSet<ChangeId>,
    changes: &[ValidatedChange],
    keys: &TreeKeys,
) -> Result<()> {
    for change in changes.iter().filter(|c| incoming.contains(&c.id)) {
        let author = &change.payload.author;
        if keys.can_author(author, kind) {
            continue;
        }
        return Err(match kind {
            TreeKind::Credential => GroveError::signature(format!(
                "change {} in tree {tree_id} is not signed by the registered signer",
                change.id
            )),
            TreeKind::Object => GroveError::permission_denied(format!(
                "change {} in tree {tree_id} is by {author}, who never held write permission in {}",
                change.id, keys.space_id
            )),
        });
    }
    Ok(())
}

impl TreeAccess {
    /// Access over `store`, recording metadata in `index`
    pub fn new(store: TreeStore, index: Arc<SpaceIndex>, wait: WaitConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            index,
            locks: Arc::new(DashMap::new()),
            events,
            wait,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    /// Shared index
    pub fn index(&self) -> &Arc<SpaceIndex> {
        &self.index
    }

    /// Subscribe to successful writes
    pub fn subscribe(&self) -> broadcast::Receiver<HeadEvent> {
        self.events.subscribe()
    }

    /// Take the lock of one tree
    pub async fn lock_tree(&self, space_id: &SpaceId, tree_id: &TreeId) -> TreeGuard {
        let key = (space_id.clone(), *tree_id);
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        TreeGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
            key,
        }
    }

    /// Trees currently locked or waited on
    pub fn locked_trees(&self) -> usize {
        self.locks.len()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Build a tree from persisted changes and the current ledger
    ///
    /// Trees marked invalid fail with the recorded reason without touching
    /// the store.
    pub async fn get_tree(&self, space: &Space, tree_id: &TreeId) -> Result<ObjectTree> {
        if let Some(ObjectIndexEntry {
            status: EntryStatus::Invalid { reason },
            ..
        }) = self.index.get(space.id(), tree_id)
        {
            return Err(GroveError::invalid_tree(tree_id.to_hex(), reason));
        }

        let raw = self.store.load_changes(space.id(), tree_id).await?;
        if raw.is_empty() {
            return Err(GroveError::not_found(format!("tree {tree_id} in space {}", space.id())));
        }
        let keys = space.tree_keys().await?;

        match ObjectTree::build(space.id(), tree_id, &raw, &keys) {
            Ok(tree) => Ok(tree),
            Err(e) if is_structural(&e) => {
                warn!(space = %space.id(), tree = %tree_id, error = %e, "stored tree is invalid");
                self.index.mark_invalid(space.id(), tree_id, invalid_reason(&e));
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Index every stored tree of a space; returns the number of valid trees
    pub async fn build_space_index(&self, space_id: &SpaceId) -> Result<usize> {
        let mut valid = 0;
        for tree_id in self.store.list_tree_ids(space_id).await? {
            match self.store.load_validated(space_id, &tree_id).await {
                Ok(tree) => {
                    self.index.upsert(space_id, ObjectIndexEntry::from_validated(&tree));
                    valid += 1;
                }
                Err(e) if is_structural(&e) => {
                    warn!(space = %space_id, tree = %tree_id, error = %e, "indexing found an invalid tree");
                    self.index.mark_invalid(space_id, &tree_id, invalid_reason(&e));
                }
                Err(e) => return Err(e),
            }
        }
        debug!(space = %space_id, trees = valid, "space index built");
        Ok(valid)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Validate `changes` together with the stored tree and persist them
    ///
    /// Validation is structural and signature-only; nothing is decrypted.
    /// Every new change must be authored by someone the space's ledger
    /// lets write. A tree with nothing stored that fails structurally is
    /// marked invalid; a bad batch for a stored tree is only rejected.
    /// Returns how many changes were new.
    pub async fn validate_and_put_tree(
        &self,
        space: &Space,
        tree_id: &TreeId,
        changes: Vec<RawChange>,
        origin: ChangeOrigin,
    ) -> Result<usize> {
        let keys = space.tree_keys().await?;
        let guard = self.lock_tree(space.id(), tree_id).await;
        self.commit_locked(&guard, &keys, tree_id, changes, origin).await
    }

    /// [`TreeAccess::validate_and_put_tree`] for a caller already holding
    /// the tree's lock, with `keys` taken from the space's ledger
    pub async fn commit_locked(
        &self,
        _guard: &TreeGuard,
        keys: &TreeKeys,
        tree_id: &TreeId,
        changes: Vec<RawChange>,
        origin: ChangeOrigin,
    ) -> Result<usize> {
        let space_id = &keys.space_id;
        let mut merged: BTreeMap<ChangeId, RawChange> = self
            .store
            .load_changes(space_id, tree_id)
            .await?
            .into_iter()
            .map(|c| (c.id(), c))
            .collect();
        let stored = !merged.is_empty();
        let mut incoming = Vec::new();
        for change in changes {
            let id = change.id();
            if !merged.contains_key(&id) {
                merged.insert(id, change.clone());
                incoming.push(change);
            }
        }
        if incoming.is_empty() {
            trace!(space = %space_id, tree = %tree_id, "nothing new to store");
            return Ok(0);
        }

        let all: Vec<RawChange> = merged.into_values().collect();
        let incoming_ids: BTreeSet<ChangeId> = incoming.iter().map(RawChange::id).collect();
        let checked = validate_tree(space_id, tree_id, &all).and_then(|tree| {
            authorize_incoming(tree_id, tree.header.kind, &incoming_ids, &tree.changes, keys)?;
            Ok(tree)
        });
        let validated = match checked {
            Ok(tree) => tree,
            Err(e) => {
                warn!(space = %space_id, tree = %tree_id, ?origin, stored, error = %e, "rejected tree changes");
                if !stored && is_structural(&e) {
                    self.index.mark_invalid(space_id, tree_id, invalid_reason(&e));
                }
                return Err(e);
            }
        };

        let added = self.store.put_changes(space_id, tree_id, &incoming).await?;
        self.index.upsert(space_id, ObjectIndexEntry::from_validated(&validated));
        debug!(space = %space_id, tree = %tree_id, added, ?origin, "tree updated");

        // No subscribers is fine.
        let _ = self.events.send(HeadEvent {
            space_id: space_id.clone(),
            tree_id: *tree_id,
            heads: validated.heads,
            changes: incoming,
            origin,
        });
        Ok(added)
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    /// Wait until the space indexes at least `min_trees` valid trees
    ///
    /// Polls with exponential backoff. Fails with `SyncTimeout` after
    /// `timeout` and with `Cancelled` when `cancel` fires.
    pub async fn wait_for_sync(
        &self,
        space_id: &SpaceId,
        min_trees: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let max_backoff = Duration::from_millis(self.wait.max_backoff_ms);
        let mut backoff = Duration::from_millis(self.wait.initial_backoff_ms.max(1));

        loop {
            let count = self.index.tree_count(space_id);
            if count >= min_trees {
                return Ok(count);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(GroveError::sync_timeout(
                    format!("wait_for_sync({space_id}, {min_trees})"),
                    timeout.as_millis() as u64,
                ));
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(GroveError::cancelled("wait_for_sync")),
                () = tokio::time::sleep(backoff.min(deadline - now)) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}
