//! In-memory peer network
//!
//! Every peer registers its [`PeerHandler`]; a [`MemoryTransport`] delivers
//! requests by calling the target's handler directly. Messages pass through
//! their byte encoding on the way so the wire format is exercised too.
//! Peers can be cut off to simulate outages.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use grove_core::{GroveError, PeerId, Result, SpaceId};
use grove_sync::{HeadUpdate, PeerHandler, PeerTransport, SyncRequest, SyncResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Shared switchboard between test peers
#[derive(Default)]
pub struct MemoryNetwork {
    handlers: DashMap<PeerId, Arc<dyn PeerHandler>>,
    unreachable: DashSet<PeerId>,
    delivered: AtomicU64,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("peers", &self.peers())
            .field("unreachable", &self.unreachable.len())
            .finish()
    }
}

impl MemoryNetwork {
    /// Empty network
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach `peer`'s inbound handler
    pub fn register(&self, peer: PeerId, handler: Arc<dyn PeerHandler>) {
        self.handlers.insert(peer, handler);
    }

    /// Outbound transport for `peer`
    pub fn transport(self: &Arc<Self>, peer: PeerId) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            local: peer,
            network: self.clone(),
        })
    }

    /// Cut `peer` off, or reconnect it
    pub fn set_unreachable(&self, peer: &PeerId, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(peer.clone());
        } else {
            self.unreachable.remove(peer);
        }
    }

    /// Registered peers, sorted
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.handlers.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Messages delivered so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn handler(&self, from: &PeerId, to: &PeerId) -> Result<Arc<dyn PeerHandler>> {
        if self.unreachable.contains(to) || self.unreachable.contains(from) {
            return Err(GroveError::peer_unreachable(to.as_str(), "peer is cut off"));
        }
        let handler = self
            .handlers
            .get(to)
            .map(|h| h.value().clone())
            .ok_or_else(|| GroveError::peer_unreachable(to.as_str(), "peer is not registered"))?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(handler)
    }
}

/// One peer's view of a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    local: PeerId,
    network: Arc<MemoryNetwork>,
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    async fn request(&self, peer: &PeerId, request: SyncRequest) -> Result<SyncResponse> {
        let handler = self.network.handler(&self.local, peer)?;
        trace!(from = %self.local, to = %peer, ?request, "request");
        let request = SyncRequest::from_bytes(&request.to_bytes()?)?;
        let response = handler.handle_request(&self.local, request).await?;
        SyncResponse::from_bytes(&response.to_bytes()?)
    }

    async fn send_head_update(&self, peer: &PeerId, update: HeadUpdate) -> Result<()> {
        let handler = self.network.handler(&self.local, peer)?;
        trace!(from = %self.local, to = %peer, tree = %update.tree_id, "head update");
        handler.handle_head_update(&self.local, update).await
    }

    async fn responsible_peers(&self, _space_id: &SpaceId) -> Result<Vec<PeerId>> {
        Ok(self.network.peers().into_iter().filter(|p| p != &self.local).collect())
    }
}
