//! Replica wiring
//!
//! [`Replica`] owns one replica's resolver, index, tree access and
//! managers over a shared storage backend. Opening a space through the
//! replica also indexes the trees already stored for it.

use grove_acl::{JoinReceipt, OrderingAuthority};
use grove_core::crypto::{RecoverySeed, SigningKey, SpaceKeyTriple};
use grove_core::effects::StorageEffects;
use grove_core::{GroveConfig, OwnerId, Result, SpaceId, SpaceKind};
use grove_store::{FilesystemStorage, MemoryStorage, ReadKeyStore};
use grove_tree::TreeStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::access::TreeAccess;
use crate::credential::CredentialManager;
use crate::index::SpaceIndex;
use crate::namespace::NamespaceCoordinator;
use crate::object::ObjectManager;
use crate::resolver::{Space, SpaceResolver};

/// One replica's space-level services
#[derive(Debug, Clone)]
pub struct Replica {
    config: GroveConfig,
    resolver: Arc<SpaceResolver>,
    access: Arc<TreeAccess>,
    credentials: CredentialManager,
    objects: ObjectManager,
}

impl Replica {
    /// Wire a replica over explicit backends
    pub fn new(
        config: GroveConfig,
        storage: Arc<dyn StorageEffects>,
        read_keys: ReadKeyStore,
        authority: Arc<dyn OrderingAuthority>,
        namespace: Arc<dyn NamespaceCoordinator>,
    ) -> Self {
        let resolver = Arc::new(SpaceResolver::new(storage.clone(), read_keys, authority, namespace));
        let access = Arc::new(TreeAccess::new(
            TreeStore::new(storage),
            Arc::new(SpaceIndex::new()),
            config.wait.clone(),
        ));
        let credentials = CredentialManager::new(resolver.clone(), access.clone());
        let objects = ObjectManager::new(resolver.clone(), access.clone(), config.objects.snapshot_interval);
        Self {
            config,
            resolver,
            access,
            credentials,
            objects,
        }
    }

    /// Replica storing content under `config.store_dir()` and read keys
    /// under `config.key_dir()`
    pub fn open_filesystem(
        config: GroveConfig,
        authority: Arc<dyn OrderingAuthority>,
        namespace: Arc<dyn NamespaceCoordinator>,
    ) -> Result<Self> {
        let storage: Arc<dyn StorageEffects> = Arc::new(FilesystemStorage::new(config.store_dir())?);
        let read_keys = ReadKeyStore::open_dir(config.key_dir())?;
        Ok(Self::new(config, storage, read_keys, authority, namespace))
    }

    /// Replica keeping everything in memory
    pub fn in_memory(
        config: GroveConfig,
        authority: Arc<dyn OrderingAuthority>,
        namespace: Arc<dyn NamespaceCoordinator>,
    ) -> Self {
        let read_keys = ReadKeyStore::new(Arc::new(MemoryStorage::new()));
        Self::new(config, Arc::new(MemoryStorage::new()), read_keys, authority, namespace)
    }

    /// Configuration
    pub fn config(&self) -> &GroveConfig {
        &self.config
    }

    /// Space resolver
    pub fn resolver(&self) -> &Arc<SpaceResolver> {
        &self.resolver
    }

    /// Tree access and index
    pub fn access(&self) -> &Arc<TreeAccess> {
        &self.access
    }

    /// Credential manager
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Object manager
    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    async fn indexed(&self, space: Arc<Space>) -> Result<Arc<Space>> {
        self.access.build_space_index(space.id()).await?;
        Ok(space)
    }

    /// Resolve an owned space and index it
    pub async fn resolve(&self, owner: OwnerId, kind: SpaceKind, keys: &SpaceKeyTriple) -> Result<Arc<Space>> {
        let space = self.resolver.resolve(owner, kind, keys).await?;
        self.indexed(space).await
    }

    /// Derive, resolve and index an owned space
    pub async fn derive_space(
        &self,
        owner: OwnerId,
        kind: SpaceKind,
        seed: &RecoverySeed,
        index: u32,
    ) -> Result<Arc<Space>> {
        let space = self.resolver.derive_space(owner, kind, seed, index).await?;
        self.indexed(space).await
    }

    /// Open and index a space owned by someone else
    pub async fn open_space(&self, space_id: &SpaceId, identity: SigningKey) -> Result<Arc<Space>> {
        let space = self.resolver.open_space(space_id, identity).await?;
        self.indexed(space).await
    }

    /// Open and index a space after an acknowledged join
    pub async fn open_joined(&self, receipt: &JoinReceipt, identity: SigningKey) -> Result<Arc<Space>> {
        let space = self.resolver.open_joined(receipt, identity).await?;
        self.indexed(space).await
    }

    /// Wait until `space_id` indexes at least `min_trees` valid trees
    pub async fn wait_for_sync(
        &self,
        space_id: &SpaceId,
        min_trees: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.access.wait_for_sync(space_id, min_trees, timeout, cancel).await
    }
}
