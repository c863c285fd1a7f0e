//! Serving peers
//!
//! Answers come straight from the ledger, the index and the tree store.
//! Head updates are queued on the existing-tree pool so a burst of pushes
//! cannot starve reconciliation.

use async_trait::async_trait;
use grove_core::{GroveError, PeerId, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::reconcile::Reconciler;
use crate::transport::PeerHandler;
use crate::wire::{HeadUpdate, SyncRequest, SyncResponse, TreeDigest};

/// [`PeerHandler`] backed by a [`Reconciler`]
#[derive(Debug, Clone)]
pub struct SyncHandler {
    reconciler: Arc<Reconciler>,
}

impl SyncHandler {
    pub(crate) fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl PeerHandler for SyncHandler {
    async fn handle_request(&self, from: &PeerId, request: SyncRequest) -> Result<SyncResponse> {
        let replica = self.reconciler.replica();
        let space = replica.resolver().get(request.space_id()).ok_or_else(|| {
            GroveError::not_found(format!("space {} is not open on {}", request.space_id(), self.reconciler.local_peer()))
        })?;
        debug!(space = %space.id(), %from, ?request, "serving request");

        let access = replica.access();
        match request {
            SyncRequest::AclRecords { after, .. } => Ok(SyncResponse::AclRecords(space.acl().records_after(after).await)),
            SyncRequest::SpaceDigest { .. } => Ok(SyncResponse::SpaceDigest(
                access
                    .index()
                    .digest(space.id())
                    .into_iter()
                    .map(|(tree_id, head_hash)| TreeDigest { tree_id, head_hash })
                    .collect(),
            )),
            SyncRequest::FullTree { tree_id, .. } => {
                if let Some(entry) = access.index().get(space.id(), &tree_id) {
                    if !entry.is_valid() {
                        return Err(GroveError::invalid_tree(tree_id.to_string(), "tree is marked invalid here"));
                    }
                }
                Ok(SyncResponse::Changes(access.store().load_changes(space.id(), &tree_id).await?))
            }
            SyncRequest::TreeChangesSince {
                tree_id, known_heads, ..
            } => Ok(SyncResponse::Changes(
                access.store().changes_since(space.id(), &tree_id, &known_heads).await?,
            )),
        }
    }

    async fn handle_head_update(&self, from: &PeerId, update: HeadUpdate) -> Result<()> {
        let reconciler = self.reconciler.clone();
        let from = from.clone();
        // The job outlives this call; the sender does not wait for it.
        let _handle = self
            .reconciler
            .existing_pool()
            .submit(async move {
                let (space_id, tree_id) = (update.space_id.clone(), update.tree_id);
                if let Err(e) = reconciler.apply_head_update(&from, update).await {
                    warn!(space = %space_id, tree = %tree_id, peer = %from, error = %e, "head update not applied");
                }
            })
            .await?;
        Ok(())
    }
}
