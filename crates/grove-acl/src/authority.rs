//! Ordering authority
//!
//! The authority assigns every ledger record a position in its space's
//! chain. Its consensus mechanism is out of scope; Grove only relies on
//! the contract: a record is acknowledged once, at a stable position, and
//! only if it extends the current head.
//!
//! [`LocalOrderingAuthority`] is a single-node implementation over any
//! storage backend, used by the CLI and tests.

use async_lock::Mutex;
use async_trait::async_trait;
use grove_core::effects::StorageEffects;
use grove_core::{RecordId, Result, SpaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::list::AclList;
use crate::record::AclRecord;

/// Acknowledgement of an ordered record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclAck {
    /// Space
    pub space_id: SpaceId,
    /// Ordered record
    pub record_id: RecordId,
    /// Zero-based position in the chain
    pub position: u64,
}

/// Orders ledger records for every space
#[async_trait]
pub trait OrderingAuthority: Send + Sync {
    /// Order a record; fails with `Conflict` if it does not extend the head
    async fn submit(&self, record: AclRecord) -> Result<AclAck>;

    /// Ordered records after `after` (all when `None`)
    async fn records_after(&self, space_id: &SpaceId, after: Option<RecordId>) -> Result<Vec<AclRecord>>;
}

/// Single-node authority persisting ledgers in a storage backend
pub struct LocalOrderingAuthority {
    storage: Arc<dyn StorageEffects>,
    ledgers: Mutex<HashMap<SpaceId, Arc<AclList>>>,
}

impl std::fmt::Debug for LocalOrderingAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOrderingAuthority").finish_non_exhaustive()
    }
}

impl LocalOrderingAuthority {
    /// Authority storing ledgers in `storage`
    pub fn new(storage: Arc<dyn StorageEffects>) -> Self {
        Self {
            storage,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    async fn ledger(&self, space_id: &SpaceId) -> Result<Arc<AclList>> {
        let mut ledgers = self.ledgers.lock().await;
        if let Some(list) = ledgers.get(space_id) {
            return Ok(list.clone());
        }
        let list = Arc::new(AclList::open(space_id.clone(), self.storage.clone()).await?);
        ledgers.insert(space_id.clone(), list.clone());
        Ok(list)
    }
}

#[async_trait]
impl OrderingAuthority for LocalOrderingAuthority {
    async fn submit(&self, record: AclRecord) -> Result<AclAck> {
        let space_id = record.space_id().clone();
        let record_id = record.id();
        let list = self.ledger(&space_id).await?;

        // Resubmitting an ordered record is acknowledged at its position.
        if list.position_of(&record_id).await.is_none() {
            list.add_records(std::slice::from_ref(&record)).await?;
        }
        let position = list
            .position_of(&record_id)
            .await
            .unwrap_or_default() as u64;

        debug!(space = %space_id, record = %record_id, position, "ordered ledger record");
        Ok(AclAck {
            space_id,
            record_id,
            position,
        })
    }

    async fn records_after(&self, space_id: &SpaceId, after: Option<RecordId>) -> Result<Vec<AclRecord>> {
        Ok(self.ledger(space_id).await?.records_after(after).await)
    }
}
