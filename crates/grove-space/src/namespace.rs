//! Namespace coordination
//!
//! Peers find a space's header through a [`NamespaceCoordinator`]. Only
//! verified headers are accepted, and re-registering the identical header
//! is a no-op, which makes space creation idempotent across crashes.

use async_trait::async_trait;
use grove_core::effects::StorageEffects;
use grove_core::{GroveError, Result, SpaceId};
use std::sync::Arc;
use tracing::debug;

use crate::header::SpaceHeader;

/// Registers and looks up space headers across peers
#[async_trait]
pub trait NamespaceCoordinator: Send + Sync {
    /// Register a header; identical re-registration succeeds, a different
    /// header for the same id is a `Conflict`
    async fn register(&self, header: SpaceHeader) -> Result<SpaceId>;

    /// Fetch the header registered for `space_id`
    async fn lookup(&self, space_id: &SpaceId) -> Result<Option<SpaceHeader>>;
}

/// Namespace registry persisted in a storage backend
pub struct LocalNamespaceRegistry {
    storage: Arc<dyn StorageEffects>,
}

impl std::fmt::Debug for LocalNamespaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNamespaceRegistry").finish_non_exhaustive()
    }
}

fn header_key(space_id: &SpaceId) -> String {
    format!("namespace/{space_id}/header")
}

impl LocalNamespaceRegistry {
    /// Registry over `storage`
    pub fn new(storage: Arc<dyn StorageEffects>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl NamespaceCoordinator for LocalNamespaceRegistry {
    async fn register(&self, header: SpaceHeader) -> Result<SpaceId> {
        header.verify()?;
        let space_id = header.space_id();
        let key = header_key(&space_id);

        if let Some(bytes) = self.storage.retrieve(&key).await? {
            let existing = SpaceHeader::from_bytes(&bytes)?;
            if existing == header {
                return Ok(space_id);
            }
            return Err(GroveError::conflict(format!(
                "space {space_id} is registered with a different header"
            )));
        }

        self.storage.store(&key, header.to_bytes()?).await?;
        debug!(space = %space_id, "registered space header");
        Ok(space_id)
    }

    async fn lookup(&self, space_id: &SpaceId) -> Result<Option<SpaceHeader>> {
        match self.storage.retrieve(&header_key(space_id)).await? {
            Some(bytes) => Ok(Some(SpaceHeader::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::crypto::SigningKey;
    use grove_core::{OwnerId, SpaceKind};
    use grove_store::MemoryStorage;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = LocalNamespaceRegistry::new(Arc::new(MemoryStorage::new()));
        let master = SigningKey::generate();
        let header = SpaceHeader::new(OwnerId::new("o"), SpaceKind::Community, &master, SigningKey::generate().public_key());

        let id = registry.register(header.clone()).await.unwrap();
        assert_eq!(registry.register(header.clone()).await.unwrap(), id);
        assert_eq!(registry.lookup(&id).await.unwrap(), Some(header));
    }

    #[tokio::test]
    async fn test_conflicting_header_rejected() {
        let registry = LocalNamespaceRegistry::new(Arc::new(MemoryStorage::new()));
        let master = SigningKey::generate();
        let a = SpaceHeader::new(OwnerId::new("o"), SpaceKind::Community, &master, SigningKey::generate().public_key());
        let b = SpaceHeader::new(OwnerId::new("o"), SpaceKind::Community, &master, SigningKey::generate().public_key());

        registry.register(a).await.unwrap();
        assert!(matches!(registry.register(b).await, Err(GroveError::Conflict { .. })));
    }
}
