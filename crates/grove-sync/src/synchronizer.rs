//! Synchronizer lifecycle
//!
//! Owns the reconciler, the periodic cycle and the push forwarder.

use grove_space::Replica;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::handler::SyncHandler;
use crate::metrics::MetricsSnapshot;
use crate::reconcile::{CycleReport, Reconciler};
use crate::tasks::TaskRegistry;
use crate::transport::{PeerHandler, PeerTransport};

/// Keeps a replica's open spaces in step with its peers
///
/// ```ignore
/// let sync = Synchronizer::new(replica.clone(), transport);
/// network.register(peer_id, sync.handler());
/// sync.start();
/// ```
#[derive(Debug)]
pub struct Synchronizer {
    reconciler: Arc<Reconciler>,
    tasks: TaskRegistry,
    started: AtomicBool,
}

impl Synchronizer {
    /// Build a synchronizer; nothing runs until [`start`](Self::start)
    ///
    /// Spawns the worker pools, so it must be called inside a Tokio runtime.
    pub fn new(replica: Replica, transport: Arc<dyn PeerTransport>) -> Self {
        let tasks = TaskRegistry::new();
        let reconciler = Reconciler::new(replica, transport, tasks.cancellation_token());
        Self {
            reconciler,
            tasks,
            started: AtomicBool::new(false),
        }
    }

    /// Handler to register with the transport for inbound traffic
    pub fn handler(&self) -> Arc<dyn PeerHandler> {
        Arc::new(SyncHandler::new(self.reconciler.clone()))
    }

    /// Underlying reconciler
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Counter snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.reconciler.metrics().snapshot()
    }

    /// Run one cycle now, outside the schedule
    pub async fn sync_now(&self) -> CycleReport {
        self.reconciler.reconcile_all().await
    }

    /// Start periodic reconciliation and push on write; idempotent
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) || self.tasks.is_shut_down() {
            return;
        }
        let interval = self.reconciler.replica().config().sync.reconcile_interval();
        info!(peer = %self.reconciler.local_peer(), interval_ms = interval.as_millis() as u64, "synchronizer started");

        let reconciler = self.reconciler.clone();
        self.tasks.spawn_interval_until(interval, move || {
            let reconciler = reconciler.clone();
            async move {
                reconciler.reconcile_all().await;
                true
            }
        });

        let reconciler = self.reconciler.clone();
        let mut events = reconciler.replica().access().subscribe();
        self.tasks.spawn_cancellable(async move {
            loop {
                match events.recv().await {
                    Ok(event) => reconciler.push_head_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "push forwarder lagged; the next cycle reconciles");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("push forwarder stopped");
        });
    }

    /// Stop every task and worker
    pub fn stop(&self) {
        self.tasks.shutdown();
        info!(peer = %self.reconciler.local_peer(), "synchronizer stopped");
    }

    /// Whether [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.tasks.is_shut_down()
    }
}
