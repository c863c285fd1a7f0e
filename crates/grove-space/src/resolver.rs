//! Space resolution
//!
//! The resolver turns `(owner, kind, keys)` into an open [`Space`]. Opening
//! is idempotent: the header registration adopts an identical existing
//! header, and an existing ledger root is adopted instead of submitting a
//! second one. The read key is persisted before the root is submitted so
//! a crash between the two never strands a ledger whose key is lost.
//!
//! Handles are cached as `Arc<Space>`. A `Space` caches no keys and no
//! trees: [`Space::tree_keys`] re-reads the ledger on every call.

use async_lock::Mutex;
use dashmap::DashMap;
use grove_acl::{catch_up, AclAccess, AclList, JoinReceipt, OrderingAuthority};
use grove_core::crypto::{seal, RecoverySeed, SigningKey, SpaceKeyTriple};
use grove_core::effects::StorageEffects;
use grove_core::{now_ms, GroveError, OwnerId, ReadKey, Result, SpaceId, SpaceKind};
use grove_store::ReadKeyStore;
use grove_tree::TreeKeys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::header::SpaceHeader;
use crate::namespace::NamespaceCoordinator;

/// Owner details sealed into the ledger root for the metadata key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerMetadata {
    /// Owner identifier
    pub owner: OwnerId,
    /// Space kind
    pub kind: SpaceKind,
    /// Creation time
    pub created_at_ms: u64,
}

/// An open space
pub struct Space {
    id: SpaceId,
    header: SpaceHeader,
    identity: SigningKey,
    acl: Arc<AclList>,
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("id", &self.id)
            .field("identity", &self.identity.public_key())
            .finish_non_exhaustive()
    }
}

impl Space {
    /// Space id
    pub fn id(&self) -> &SpaceId {
        &self.id
    }

    /// Verified header
    pub fn header(&self) -> &SpaceHeader {
        &self.header
    }

    /// Identity this replica acts as in the space
    pub fn identity(&self) -> &SigningKey {
        &self.identity
    }

    /// Local ledger replica
    pub fn acl(&self) -> &Arc<AclList> {
        &self.acl
    }

    /// Whether this replica holds the space's registered signer
    pub fn is_owner(&self) -> bool {
        self.identity.public_key() == self.header.signing_key
    }

    /// Keys and rights granted to this replica by the current ledger
    pub async fn access(&self) -> Result<AclAccess> {
        self.acl.access_for(&self.identity).await
    }

    /// Project the current ledger into the keys a tree is built against
    ///
    /// A ledger that grants nothing yet yields a projection without read
    /// keys, so reads fail with `NoReadKey` until the ledger arrives. Its
    /// writers are still known, so remote changes can be vetted.
    pub async fn tree_keys(&self) -> Result<TreeKeys> {
        match self.access().await {
            Ok(access) => Ok(tree_keys_from(access)),
            Err(GroveError::NoReadKey { .. }) => {
                let keys = TreeKeys::empty(self.id.clone(), self.header.signing_key);
                let writers = self.acl.state().await.map(|state| state.writers().clone()).unwrap_or_default();
                Ok(writers.into_iter().fold(keys, TreeKeys::with_writer))
            }
            Err(e) => Err(e),
        }
    }

    /// Open the owner metadata sealed into the ledger root
    pub async fn owner_metadata(&self, metadata_key: &SigningKey) -> Result<OwnerMetadata> {
        let state = self
            .acl
            .state()
            .await
            .ok_or_else(|| GroveError::not_found(format!("ledger of {} is empty", self.id)))?;
        let opened = seal::open(metadata_key, state.encrypted_metadata())?;
        bincode::deserialize(&opened).map_err(|e| GroveError::serialization(format!("malformed owner metadata: {e}")))
    }
}

fn tree_keys_from(access: AclAccess) -> TreeKeys {
    let current = access.current_read_key_id;
    let mut keys = TreeKeys::empty(access.space_id, access.owner);
    for (id, key) in access.read_keys {
        keys = keys.with_read_key(key, id == current);
    }
    for writer in access.writers {
        keys = keys.with_writer(writer);
    }
    keys
}

/// Opens, creates and caches spaces
pub struct SpaceResolver {
    storage: Arc<dyn StorageEffects>,
    read_keys: ReadKeyStore,
    authority: Arc<dyn OrderingAuthority>,
    namespace: Arc<dyn NamespaceCoordinator>,
    spaces: DashMap<SpaceId, Arc<Space>>,
    opening: Mutex<()>,
}

impl std::fmt::Debug for SpaceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceResolver")
            .field("spaces", &self.spaces.len())
            .finish_non_exhaustive()
    }
}

impl SpaceResolver {
    /// Resolver persisting ledgers in `storage` and read keys in `read_keys`
    pub fn new(
        storage: Arc<dyn StorageEffects>,
        read_keys: ReadKeyStore,
        authority: Arc<dyn OrderingAuthority>,
        namespace: Arc<dyn NamespaceCoordinator>,
    ) -> Self {
        Self {
            storage,
            read_keys,
            authority,
            namespace,
            spaces: DashMap::new(),
            opening: Mutex::new(()),
        }
    }

    /// Ordering authority used for ledger submissions
    pub fn authority(&self) -> &Arc<dyn OrderingAuthority> {
        &self.authority
    }

    /// Open space handle, if any
    pub fn get(&self, space_id: &SpaceId) -> Option<Arc<Space>> {
        self.spaces.get(space_id).map(|s| s.value().clone())
    }

    /// Open space handle or `NotFound`
    pub fn require(&self, space_id: &SpaceId) -> Result<Arc<Space>> {
        self.get(space_id)
            .ok_or_else(|| GroveError::not_found(format!("space {space_id} is not open")))
    }

    /// Every open space
    pub fn spaces(&self) -> Vec<Arc<Space>> {
        let mut spaces: Vec<_> = self.spaces.iter().map(|s| s.value().clone()).collect();
        spaces.sort_by(|a, b| a.id.cmp(&b.id));
        spaces
    }

    // =========================================================================
    // Owned spaces
    // =========================================================================

    /// Open the space of `(owner, kind)` governed by `keys`, creating it on
    /// first use
    pub async fn resolve(&self, owner: OwnerId, kind: SpaceKind, keys: &SpaceKeyTriple) -> Result<Arc<Space>> {
        let header = SpaceHeader::new(owner.clone(), kind, &keys.master, keys.signing.public_key());
        let space_id = header.space_id();
        if let Some(space) = self.get(&space_id) {
            return Ok(space);
        }

        let _opening = self.opening.lock().await;
        if let Some(space) = self.get(&space_id) {
            return Ok(space);
        }

        self.namespace.register(header.clone()).await?;
        let acl = Arc::new(AclList::open(space_id.clone(), self.storage.clone()).await?);
        catch_up(&acl, self.authority.as_ref()).await?;

        if acl.is_empty().await {
            self.submit_root(&space_id, owner, kind, keys, &acl).await?;
        }

        let space = self.finish_open(header, keys.signing.clone(), acl).await?;
        info!(space = %space_id, %kind, "space resolved");
        Ok(space)
    }

    /// Create a space under freshly generated keys
    ///
    /// Keep the returned triple: resolving with it reopens the same space.
    pub async fn create_space(&self, owner: OwnerId, kind: SpaceKind) -> Result<(Arc<Space>, SpaceKeyTriple)> {
        let keys = SpaceKeyTriple::generate();
        let space = self.resolve(owner, kind, &keys).await?;
        Ok((space, keys))
    }

    /// Resolve the space whose keys are derived from `seed` at `index`
    pub async fn derive_space(
        &self,
        owner: OwnerId,
        kind: SpaceKind,
        seed: &RecoverySeed,
        index: u32,
    ) -> Result<Arc<Space>> {
        let keys = SpaceKeyTriple::derive(seed, index)?;
        self.resolve(owner, kind, &keys).await
    }

    async fn submit_root(
        &self,
        space_id: &SpaceId,
        owner: OwnerId,
        kind: SpaceKind,
        keys: &SpaceKeyTriple,
        acl: &AclList,
    ) -> Result<()> {
        // Reuse a key persisted by an earlier attempt that never got its
        // root ordered.
        let read_key = match self.read_keys.load(space_id).await? {
            Some(key) => key,
            None => {
                let key = ReadKey::generate();
                self.read_keys.persist(space_id, &key).await?;
                key
            }
        };

        let metadata = OwnerMetadata {
            owner: owner.clone(),
            kind,
            created_at_ms: now_ms(),
        };
        let encrypted_metadata = seal::seal(&keys.metadata.public_key(), &bincode::serialize(&metadata)?)?;
        let root = AclList::prepare_root(space_id.clone(), owner, &read_key, encrypted_metadata, &keys.signing)?;

        match self.authority.submit(root).await {
            Ok(ack) => debug!(space = %space_id, root = %ack.record_id, "ledger root ordered"),
            Err(GroveError::Conflict { message }) => {
                warn!(space = %space_id, %message, "ledger root already exists, adopting it");
            }
            Err(e) => return Err(e),
        }
        catch_up(acl, self.authority.as_ref()).await?;
        Ok(())
    }

    // =========================================================================
    // Joined spaces
    // =========================================================================

    /// Open a space owned by someone else as `identity`
    ///
    /// Succeeds even when the ledger does not list `identity` yet; tree
    /// reads then fail with `NoReadKey` until the ledger catches up.
    pub async fn open_space(&self, space_id: &SpaceId, identity: SigningKey) -> Result<Arc<Space>> {
        if let Some(space) = self.get(space_id) {
            return Ok(space);
        }
        let _opening = self.opening.lock().await;
        if let Some(space) = self.get(space_id) {
            return Ok(space);
        }

        let header = self.lookup_header(space_id).await?;
        let acl = Arc::new(AclList::open(space_id.clone(), self.storage.clone()).await?);
        catch_up(&acl, self.authority.as_ref()).await?;
        let space = self.finish_open(header, identity, acl).await?;
        info!(space = %space_id, "space opened");
        Ok(space)
    }

    /// Open a space right after the authority acknowledged our join
    ///
    /// The receipt's records seed the local ledger so the first content
    /// sync can already decrypt.
    pub async fn open_joined(&self, receipt: &JoinReceipt, identity: SigningKey) -> Result<Arc<Space>> {
        if identity.public_key() != receipt.identity {
            return Err(GroveError::invalid("join receipt was issued to a different identity"));
        }
        let space_id = receipt.space_id();

        if let Some(space) = self.get(space_id) {
            space.acl.add_records(&receipt.records).await?;
            self.remember_read_keys(&space).await?;
            return Ok(space);
        }

        let _opening = self.opening.lock().await;
        let header = self.lookup_header(space_id).await?;
        let acl = Arc::new(AclList::open(space_id.clone(), self.storage.clone()).await?);
        acl.add_records(&receipt.records).await?;
        catch_up(&acl, self.authority.as_ref()).await?;
        let space = self.finish_open(header, identity, acl).await?;
        info!(space = %space_id, position = receipt.ack.position, "joined space opened");
        Ok(space)
    }

    async fn lookup_header(&self, space_id: &SpaceId) -> Result<SpaceHeader> {
        let header = self
            .namespace
            .lookup(space_id)
            .await?
            .ok_or_else(|| GroveError::not_found(format!("space {space_id} is not registered")))?;
        header.verify()?;
        if header.space_id() != *space_id {
            return Err(GroveError::invalid(format!(
                "registered header derives {} instead of {space_id}",
                header.space_id()
            )));
        }
        Ok(header)
    }

    async fn finish_open(&self, header: SpaceHeader, identity: SigningKey, acl: Arc<AclList>) -> Result<Arc<Space>> {
        let space_id = header.space_id();
        if let Some(state) = acl.state().await {
            if *state.owner_identity() != header.signing_key {
                return Err(GroveError::signature(format!(
                    "ledger root of {space_id} is not signed by the registered signer"
                )));
            }
        }

        let space = Arc::new(Space {
            id: space_id.clone(),
            header,
            identity,
            acl,
        });
        self.remember_read_keys(&space).await?;
        self.spaces.insert(space_id, space.clone());
        Ok(space)
    }

    // =========================================================================
    // Ledger maintenance
    // =========================================================================

    /// Pull new ledger records from the authority
    pub async fn refresh_ledger(&self, space: &Space) -> Result<usize> {
        let added = catch_up(&space.acl, self.authority.as_ref()).await?;
        if added > 0 {
            self.remember_read_keys(space).await?;
        }
        Ok(added)
    }

    /// Persist every read key the ledger grants that is not stored yet
    ///
    /// The current key is written last so it ends up as the stored current
    /// key.
    pub async fn remember_read_keys(&self, space: &Space) -> Result<()> {
        let access = match space.access().await {
            Ok(access) => access,
            Err(GroveError::NoReadKey { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let stored: BTreeSet<_> = self
            .read_keys
            .load_all(&space.id)
            .await?
            .iter()
            .map(ReadKey::id)
            .collect();
        let current_stored = self.read_keys.load(&space.id).await?.map(|k| k.id());

        for (id, key) in &access.read_keys {
            if *id != access.current_read_key_id && !stored.contains(id) {
                self.read_keys.persist(&space.id, key).await?;
            }
        }
        if current_stored != Some(access.current_read_key_id) {
            if let Some(current) = access.current_read_key() {
                self.read_keys.persist(&space.id, current).await?;
            }
        }
        Ok(())
    }
}
