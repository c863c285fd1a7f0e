//! Transport seam
//!
//! [`PeerTransport`] is how this replica reaches others; [`PeerHandler`]
//! is how others reach it. Both are async traits so transports can be an
//! in-memory network in tests or a real network stack in deployments.

use async_trait::async_trait;
use grove_core::{PeerId, Result, SpaceId};
use std::future::Future;

use crate::wire::{HeadUpdate, SyncRequest, SyncResponse};

/// Outbound side of peer communication
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// This replica's peer id
    fn local_peer(&self) -> &PeerId;

    /// Ask `peer` a question; fails with `PeerUnreachable` when the peer
    /// cannot be reached
    async fn request(&self, peer: &PeerId, request: SyncRequest) -> Result<SyncResponse>;

    /// Tell `peer` a tree gained changes
    async fn send_head_update(&self, peer: &PeerId, update: HeadUpdate) -> Result<()>;

    /// Peers replicating `space_id`, excluding this replica
    async fn responsible_peers(&self, space_id: &SpaceId) -> Result<Vec<PeerId>>;
}

/// Inbound side of peer communication
#[async_trait]
pub trait PeerHandler: Send + Sync {
    /// Answer a request from `from`
    async fn handle_request(&self, from: &PeerId, request: SyncRequest) -> Result<SyncResponse>;

    /// Accept a head update from `from`
    async fn handle_head_update(&self, from: &PeerId, update: HeadUpdate) -> Result<()>;
}

tokio::task_local! {
    static ORIGIN_PEER: PeerId;
}

/// Peer that caused the current task, if it runs under [`with_origin_peer`]
pub fn origin_peer() -> Option<PeerId> {
    ORIGIN_PEER.try_with(Clone::clone).ok()
}

/// Run `future` with `peer` as its originating peer
pub async fn with_origin_peer<F>(peer: PeerId, future: F) -> F::Output
where
    F: Future,
{
    ORIGIN_PEER.scope(peer, future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_origin_peer_is_scoped() {
        assert_eq!(origin_peer(), None);
        let seen = with_origin_peer(PeerId::new("alice"), async { origin_peer() }).await;
        assert_eq!(seen, Some(PeerId::new("alice")));
        assert_eq!(origin_peer(), None);
    }
}
