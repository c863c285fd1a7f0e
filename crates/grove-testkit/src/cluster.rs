//! Multi-replica fixtures
//!
//! A [`TestCluster`] shares one ordering authority, one namespace registry
//! and one [`MemoryNetwork`] between any number of [`TestPeer`]s.

use grove_acl::LocalOrderingAuthority;
use grove_core::{GroveConfig, PeerId};
use grove_space::{LocalNamespaceRegistry, Replica};
use grove_store::MemoryStorage;
use grove_sync::Synchronizer;
use std::sync::Arc;

use crate::network::MemoryNetwork;

/// Config tuned for tests: short cycles and timeouts
pub fn test_config() -> GroveConfig {
    let mut config = GroveConfig::default();
    config.sync.reconcile_interval_ms = 50;
    config.sync.peer_request_timeout_ms = 500;
    config.wait.initial_backoff_ms = 5;
    config.wait.max_backoff_ms = 50;
    config
}

/// Shared infrastructure for a set of peers
#[derive(Debug)]
pub struct TestCluster {
    /// Switchboard
    pub network: Arc<MemoryNetwork>,
    /// Ledger ordering authority every peer submits to
    pub authority: Arc<LocalOrderingAuthority>,
    /// Space header registry
    pub namespace: Arc<LocalNamespaceRegistry>,
    config: GroveConfig,
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCluster {
    /// Cluster using [`test_config`]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Cluster whose peers use `config`
    pub fn with_config(config: GroveConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            authority: Arc::new(LocalOrderingAuthority::new(Arc::new(MemoryStorage::new()))),
            namespace: Arc::new(LocalNamespaceRegistry::new(Arc::new(MemoryStorage::new()))),
            config,
        }
    }

    /// Add an in-memory peer and register it on the network
    ///
    /// The synchronizer is not started; tests drive cycles with
    /// [`Synchronizer::sync_now`] or call [`Synchronizer::start`].
    pub fn add_peer(&self, name: &str) -> TestPeer {
        let id = PeerId::new(name);
        let replica = Replica::in_memory(self.config.clone(), self.authority.clone(), self.namespace.clone());
        let sync = Synchronizer::new(replica.clone(), self.network.transport(id.clone()));
        self.network.register(id.clone(), sync.handler());
        TestPeer { id, replica, sync }
    }
}

/// One replica with its synchronizer
#[derive(Debug)]
pub struct TestPeer {
    /// Network identity
    pub id: PeerId,
    /// Space services
    pub replica: Replica,
    /// Sync engine
    pub sync: Synchronizer,
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.sync.stop();
    }
}
