//! Reconciliation
//!
//! One cycle per open space:
//!
//! 1. **Ledger**: pull from the ordering authority, then from each
//!    responsible peer. Trees are only decryptable once the ledger that
//!    grants their keys is present, so the ledger always goes first.
//! 2. **Content**: compare each peer's head digest with the local index.
//!    Trees never seen are queued on the missing-tree pool with the peer
//!    as the task's origin; trees whose heads differ are queued on the
//!    existing-tree pool.
//!
//! A failing peer is logged and skipped; the next cycle tries again. A
//! tree first seen from a peer that fails validation is marked invalid and
//! left alone. Bad changes offered for a tree already held are refused
//! without touching the local copy.

use dashmap::DashSet;
use grove_core::config::SyncConfig;
use grove_core::{ChangeId, GroveError, PeerId, Result, SpaceId, TreeId};
use grove_space::{ChangeOrigin, HeadEvent, Replica, Space};
use grove_tree::RawChange;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::SyncMetrics;
use crate::pool::{JobHandle, WorkerPool};
use crate::transport::{origin_peer, with_origin_peer, PeerTransport};
use crate::wire::{HeadUpdate, SyncRequest, SyncResponse, TreeDigest};

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Spaces reconciled
    pub spaces: usize,
    /// Ledger records added
    pub ledger_records: usize,
    /// Trees queued because they were missing locally
    pub missing_trees: usize,
    /// Known trees queued because their heads differed
    pub differing_trees: usize,
    /// Peers that failed during the cycle
    pub peer_failures: usize,
}

impl CycleReport {
    fn merge(&mut self, other: CycleReport) {
        self.spaces += other.spaces;
        self.ledger_records += other.ledger_records;
        self.missing_trees += other.missing_trees;
        self.differing_trees += other.differing_trees;
        self.peer_failures += other.peer_failures;
    }
}

/// Pulls ledgers and trees from peers and applies what they push
pub struct Reconciler {
    replica: Replica,
    transport: Arc<dyn PeerTransport>,
    config: SyncConfig,
    metrics: Arc<SyncMetrics>,
    missing_pool: WorkerPool,
    existing_pool: WorkerPool,
    in_flight: DashSet<(SpaceId, TreeId)>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("peer", self.transport.local_peer())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler for `replica`; pools stop when `cancel` fires
    pub fn new(replica: Replica, transport: Arc<dyn PeerTransport>, cancel: CancellationToken) -> Arc<Self> {
        let config = replica.config().sync.clone();
        let missing_pool = WorkerPool::new(
            "missing-trees",
            config.missing_tree_workers,
            config.queue_capacity,
            cancel.clone(),
        );
        let existing_pool = WorkerPool::new(
            "existing-trees",
            config.existing_tree_workers,
            config.queue_capacity,
            cancel,
        );
        Arc::new(Self {
            replica,
            transport,
            config,
            metrics: Arc::new(SyncMetrics::default()),
            missing_pool,
            existing_pool,
            in_flight: DashSet::new(),
        })
    }

    /// Replica being synchronized
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Counters
    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub(crate) fn local_peer(&self) -> &PeerId {
        self.transport.local_peer()
    }

    pub(crate) fn existing_pool(&self) -> &WorkerPool {
        &self.existing_pool
    }

    async fn ask(&self, peer: &PeerId, request: SyncRequest) -> Result<SyncResponse> {
        let timeout = self.config.peer_request_timeout();
        match tokio::time::timeout(timeout, self.transport.request(peer, request)).await {
            Ok(result) => result,
            Err(_) => Err(GroveError::peer_unreachable(
                peer.as_str(),
                format!("no answer within {}ms", timeout.as_millis()),
            )),
        }
    }

    fn peer_failed(&self, space_id: &SpaceId, peer: &PeerId, stage: &str, error: &GroveError, report: &mut CycleReport) {
        warn!(space = %space_id, %peer, stage, %error, "peer failed, retrying next cycle");
        SyncMetrics::incr(&self.metrics.peer_failures_total);
        report.peer_failures += 1;
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    /// Reconcile every open space once
    pub async fn reconcile_all(self: &Arc<Self>) -> CycleReport {
        let mut report = CycleReport::default();
        for space in self.replica.resolver().spaces() {
            match self.reconcile_space(&space).await {
                Ok(space_report) => report.merge(space_report),
                Err(e) => warn!(space = %space.id(), error = %e, "space reconciliation failed"),
            }
        }
        SyncMetrics::incr(&self.metrics.cycles_total);
        debug!(?report, "reconciliation cycle finished");
        report
    }

    /// Reconcile one space: ledger first, then content
    ///
    /// Returns once every tree job queued by this cycle has finished.
    pub async fn reconcile_space(self: &Arc<Self>, space: &Arc<Space>) -> Result<CycleReport> {
        let peers = self.transport.responsible_peers(space.id()).await?;
        let mut report = CycleReport {
            spaces: 1,
            ..CycleReport::default()
        };

        self.sync_ledger(space, &peers, &mut report).await?;
        let jobs = self.sync_content(space, &peers, &mut report).await?;
        for job in jobs {
            job.finished().await;
        }
        Ok(report)
    }

    async fn sync_ledger(&self, space: &Arc<Space>, peers: &[PeerId], report: &mut CycleReport) -> Result<()> {
        match self.replica.resolver().refresh_ledger(space).await {
            Ok(added) => report.ledger_records += added,
            Err(e) => warn!(space = %space.id(), error = %e, "ordering authority unavailable"),
        }

        let mut from_peers = 0;
        for peer in peers {
            let after = space.acl().head().await;
            let records = match self
                .ask(peer, SyncRequest::AclRecords {
                    space_id: space.id().clone(),
                    after,
                })
                .await
                .and_then(SyncResponse::into_acl_records)
            {
                Ok(records) => records,
                Err(e) => {
                    self.peer_failed(space.id(), peer, "ledger", &e, report);
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }
            match space.acl().add_records(&records).await {
                Ok(added) => from_peers += added,
                Err(e) => self.peer_failed(space.id(), peer, "ledger", &e, report),
            }
        }

        if from_peers > 0 {
            self.replica.resolver().remember_read_keys(space).await?;
            report.ledger_records += from_peers;
        }
        SyncMetrics::add(&self.metrics.ledger_records_total, report.ledger_records as u64);
        Ok(())
    }

    async fn sync_content(
        self: &Arc<Self>,
        space: &Arc<Space>,
        peers: &[PeerId],
        report: &mut CycleReport,
    ) -> Result<Vec<JobHandle>> {
        let index = self.replica.access().index().clone();
        let mut jobs = Vec::new();

        for peer in peers {
            let digest = match self
                .ask(peer, SyncRequest::SpaceDigest {
                    space_id: space.id().clone(),
                })
                .await
                .and_then(SyncResponse::into_digest)
            {
                Ok(digest) => digest,
                Err(e) => {
                    self.peer_failed(space.id(), peer, "digest", &e, report);
                    continue;
                }
            };

            for TreeDigest { tree_id, head_hash } in digest {
                match index.get(space.id(), &tree_id) {
                    Some(entry) if !entry.is_valid() => {}
                    Some(entry) if entry.last_known_head_hash == head_hash => {}
                    Some(_) => {
                        report.differing_trees += 1;
                        let this = self.clone();
                        let (peer, space_id) = (peer.clone(), space.id().clone());
                        jobs.push(
                            self.existing_pool
                                .submit(async move {
                                    if let Err(e) = this.pull_tree_changes(&peer, &space_id, &tree_id).await {
                                        warn!(space = %space_id, tree = %tree_id, %peer, error = %e, "tree pull failed");
                                    }
                                })
                                .await?,
                        );
                    }
                    None => {
                        if !self.in_flight.insert((space.id().clone(), tree_id)) {
                            continue;
                        }
                        report.missing_trees += 1;
                        let this = self.clone();
                        let (peer, space_id) = (peer.clone(), space.id().clone());
                        jobs.push(
                            self.missing_pool
                                .submit(async move {
                                    let result = with_origin_peer(peer, this.fetch_missing_tree(&space_id, &tree_id)).await;
                                    if let Err(e) = result {
                                        warn!(space = %space_id, tree = %tree_id, error = %e, "missing tree fetch failed");
                                    }
                                    this.in_flight.remove(&(space_id, tree_id));
                                })
                                .await?,
                        );
                    }
                }
            }
        }
        Ok(jobs)
    }

    // =========================================================================
    // Tree transfer
    // =========================================================================

    async fn put_remote(&self, peer: &PeerId, space_id: &SpaceId, tree_id: &TreeId, changes: Vec<RawChange>) -> Result<usize> {
        let space = self.replica.resolver().require(space_id)?;
        let access = self.replica.access();
        let result = access
            .validate_and_put_tree(&space, tree_id, changes, ChangeOrigin::Remote(peer.clone()))
            .await;
        if let Err(
            e @ (GroveError::InvalidTree { .. } | GroveError::Signature { .. } | GroveError::PermissionDenied { .. }),
        ) = &result
        {
            let marked = access.index().get(space_id, tree_id).is_some_and(|entry| !entry.is_valid());
            if marked {
                SyncMetrics::incr(&self.metrics.invalid_trees_total);
            } else {
                SyncMetrics::incr(&self.metrics.rejected_changes_total);
                debug!(space = %space_id, tree = %tree_id, %peer, error = %e, "rejected changes from peer");
            }
        }
        result
    }

    /// Fetch a whole tree from the task's originating peer
    pub async fn fetch_missing_tree(&self, space_id: &SpaceId, tree_id: &TreeId) -> Result<usize> {
        let peer = origin_peer()
            .ok_or_else(|| GroveError::internal("missing-tree fetch outside an originating peer scope"))?;
        let changes = self
            .ask(&peer, SyncRequest::FullTree {
                space_id: space_id.clone(),
                tree_id: *tree_id,
            })
            .await?
            .into_changes()?;
        if changes.is_empty() {
            return Ok(0);
        }
        let added = self.put_remote(&peer, space_id, tree_id, changes).await?;
        SyncMetrics::incr(&self.metrics.trees_fetched_total);
        debug!(space = %space_id, tree = %tree_id, %peer, added, "fetched missing tree");
        Ok(added)
    }

    /// Pull the changes `peer` has beyond our heads of a known tree
    pub async fn pull_tree_changes(&self, peer: &PeerId, space_id: &SpaceId, tree_id: &TreeId) -> Result<usize> {
        let known_heads = self
            .replica
            .access()
            .index()
            .get(space_id, tree_id)
            .map(|e| e.heads)
            .unwrap_or_default();
        let changes = self
            .ask(peer, SyncRequest::TreeChangesSince {
                space_id: space_id.clone(),
                tree_id: *tree_id,
                known_heads,
            })
            .await?
            .into_changes()?;
        if changes.is_empty() {
            return Ok(0);
        }
        let added = self.put_remote(peer, space_id, tree_id, changes).await?;
        if added > 0 {
            SyncMetrics::incr(&self.metrics.head_updates_applied_total);
        }
        Ok(added)
    }

    /// Apply a pushed head update
    ///
    /// Updates whose parents are all known are stored directly. Otherwise
    /// the gap is filled from the sender: the whole tree if it is new here,
    /// the changes since our heads if not.
    pub async fn apply_head_update(&self, from: &PeerId, update: HeadUpdate) -> Result<usize> {
        let HeadUpdate {
            space_id,
            tree_id,
            changes,
            ..
        } = update;
        if self.replica.resolver().get(&space_id).is_none() {
            debug!(space = %space_id, %from, "head update for a space that is not open");
            return Ok(0);
        }
        if let Some(entry) = self.replica.access().index().get(&space_id, &tree_id) {
            if !entry.is_valid() {
                debug!(space = %space_id, tree = %tree_id, "ignoring head update for an invalid tree");
                return Ok(0);
            }
        }

        let existing: HashSet<ChangeId> = self
            .replica
            .access()
            .store()
            .load_changes(&space_id, &tree_id)
            .await?
            .iter()
            .map(RawChange::id)
            .collect();
        let incoming: HashSet<ChangeId> = changes.iter().map(RawChange::id).collect();
        let connected = !changes.is_empty()
            && changes.iter().all(|change| match change.decode() {
                Ok(payload) => payload
                    .previous_ids
                    .iter()
                    .all(|id| existing.contains(id) || incoming.contains(id)),
                // Let validation reject it.
                Err(_) => true,
            });

        if connected {
            let added = self.put_remote(from, &space_id, &tree_id, changes).await?;
            if added > 0 {
                SyncMetrics::incr(&self.metrics.head_updates_applied_total);
            }
            Ok(added)
        } else if existing.is_empty() {
            with_origin_peer(from.clone(), self.fetch_missing_tree(&space_id, &tree_id)).await
        } else {
            self.pull_tree_changes(from, &space_id, &tree_id).await
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Announce a local write to every responsible peer
    pub async fn push_head_event(&self, event: HeadEvent) {
        if event.origin != ChangeOrigin::Local {
            return;
        }
        let peers = match self.transport.responsible_peers(&event.space_id).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(space = %event.space_id, error = %e, "cannot list peers for push");
                return;
            }
        };

        let update = HeadUpdate {
            space_id: event.space_id,
            tree_id: event.tree_id,
            heads: event.heads,
            changes: event.changes,
        };
        for peer in peers {
            match self.transport.send_head_update(&peer, update.clone()).await {
                Ok(()) => SyncMetrics::incr(&self.metrics.head_updates_sent_total),
                Err(e) => {
                    SyncMetrics::incr(&self.metrics.peer_failures_total);
                    warn!(space = %update.space_id, tree = %update.tree_id, %peer, error = %e, "head push failed");
                }
            }
        }
        info!(space = %update.space_id, tree = %update.tree_id, "pushed head update");
    }
}
