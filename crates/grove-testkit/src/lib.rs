//! # Grove Testkit
//!
//! Shared fixtures for tests that need more than one replica:
//!
//! - [`network`]: an in-memory peer network with outage injection
//! - [`cluster`]: peers sharing one authority and namespace registry
//!
//! ```rust,no_run
//! use grove_testkit::TestCluster;
//!
//! # async fn demo() {
//! let cluster = TestCluster::new();
//! let alice = cluster.add_peer("alice");
//! let bob = cluster.add_peer("bob");
//! bob.sync.sync_now().await;
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod cluster;
pub mod network;

pub use cluster::{test_config, TestCluster, TestPeer};
pub use network::{MemoryNetwork, MemoryTransport};

use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; honours `RUST_LOG`
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_target(false)
        .try_init();
}
