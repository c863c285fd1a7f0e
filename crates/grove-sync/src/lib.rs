//! # Grove Sync
//!
//! Keeps replicas of a space converging:
//!
//! - [`wire`]: requests, responses and head updates exchanged by peers
//! - [`transport`]: the [`PeerTransport`] / [`PeerHandler`] seams
//! - [`pool`]: bounded worker pools for tree fetches
//! - [`reconcile`]: ledger-then-content reconciliation ([`Reconciler`])
//! - [`handler`]: serving peers from local state ([`SyncHandler`])
//! - [`synchronizer`]: periodic cycles and push on write ([`Synchronizer`])
//!
//! Missing trees are fetched on one pool and known trees updated on
//! another, so a space full of unseen trees never delays updates to the
//! trees a replica already has.

#![forbid(unsafe_code)]

pub mod handler;
pub mod metrics;
pub mod pool;
pub mod reconcile;
pub mod synchronizer;
mod tasks;
pub mod transport;
pub mod wire;

pub use handler::SyncHandler;
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use pool::{JobHandle, WorkerPool};
pub use reconcile::{CycleReport, Reconciler};
pub use synchronizer::Synchronizer;
pub use transport::{origin_peer, with_origin_peer, PeerHandler, PeerTransport};
pub use wire::{HeadUpdate, SyncRequest, SyncResponse, TreeDigest};
