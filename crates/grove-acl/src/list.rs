//! Persisted ledger
//!
//! [`AclList`] is the local replica of one space's ledger. Records are
//! stored under `acl/<space>/record/<position>` and the reduced
//! [`AclState`] is kept alongside them in memory. New records from the
//! ordering authority or peers go through [`AclList::add_records`], which
//! validates each against the current head.
//!
//! The `prepare_*` builders produce signed records without applying them;
//! records only enter the ledger once ordered.

use async_lock::RwLock;
use grove_core::crypto::{seal, PublicKey, ReadKey, SigningKey};
use grove_core::effects::StorageEffects;
use grove_core::{GroveError, OwnerId, RecordId, Result, SpaceId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::record::{AclGrant, AclRecord, KeyRotation, Permission};
use crate::state::{AclAccess, AclState};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<AclRecord>,
    ids: Vec<RecordId>,
    state: Option<AclState>,
}

/// Local replica of one space's ledger
pub struct AclList {
    space_id: SpaceId,
    storage: Arc<dyn StorageEffects>,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for AclList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AclList")
            .field("space_id", &self.space_id)
            .finish_non_exhaustive()
    }
}

fn record_prefix(space_id: &SpaceId) -> String {
    format!("acl/{space_id}/record/")
}

fn record_key(space_id: &SpaceId, position: usize) -> String {
    format!("{}{position:020}", record_prefix(space_id))
}

impl AclList {
    /// Open the persisted ledger of `space_id` (possibly empty)
    pub async fn open(space_id: SpaceId, storage: Arc<dyn StorageEffects>) -> Result<Self> {
        let mut records = Vec::new();
        for key in storage.list_keys(Some(&record_prefix(&space_id))).await? {
            if let Some(bytes) = storage.retrieve(&key).await? {
                records.push(AclRecord::from_bytes(&bytes)?);
            }
        }

        let state = if records.is_empty() {
            None
        } else {
            Some(AclState::replay(&records)?)
        };
        let ids = records.iter().map(AclRecord::id).collect();
        debug!(space = %space_id, records = records.len(), "opened ledger");

        Ok(Self {
            space_id,
            storage,
            inner: RwLock::new(Inner { records, ids, state }),
        })
    }

    /// Space
    pub fn space_id(&self) -> &SpaceId {
        &self.space_id
    }

    /// Snapshot of the reduced state, `None` before the root arrives
    pub async fn state(&self) -> Option<AclState> {
        self.inner.read().await.state.clone()
    }

    /// Latest record id
    pub async fn head(&self) -> Option<RecordId> {
        self.inner.read().await.ids.last().copied()
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Whether the root has not arrived yet
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// Position of a record in the chain
    pub async fn position_of(&self, id: &RecordId) -> Option<usize> {
        self.inner.read().await.ids.iter().position(|r| r == id)
    }

    /// Records after `after` (all records when `None`)
    ///
    /// An unknown `after` means the caller is ahead of or diverged from
    /// this replica; nothing is returned.
    pub async fn records_after(&self, after: Option<RecordId>) -> Vec<AclRecord> {
        let inner = self.inner.read().await;
        match after {
            None => inner.records.clone(),
            Some(id) => match inner.ids.iter().position(|r| *r == id) {
                Some(pos) => inner.records[pos + 1..].to_vec(),
                None => Vec::new(),
            },
        }
    }

    /// Validate and append records in order, skipping ones already held.
    /// Returns how many were new.
    pub async fn add_records(&self, records: &[AclRecord]) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut added = 0;

        for record in records {
            let id = record.id();
            if inner.ids.contains(&id) {
                continue;
            }
            if record.space_id() != &self.space_id {
                return Err(GroveError::invalid(format!(
                    "record for space {} offered to ledger of {}",
                    record.space_id(),
                    self.space_id
                )));
            }

            let next = match &inner.state {
                None => AclState::from_root(record)?,
                Some(state) => {
                    let mut next = state.clone();
                    next.apply(record)?;
                    next
                }
            };

            let position = inner.records.len();
            self.storage
                .store(&record_key(&self.space_id, position), record.to_bytes()?)
                .await?;
            inner.records.push(record.clone());
            inner.ids.push(id);
            inner.state = Some(next);
            added += 1;
        }

        if added > 0 {
            info!(space = %self.space_id, added, len = inner.records.len(), "ledger advanced");
        }
        Ok(added)
    }

    /// Read keys and write rights reachable by `identity`
    pub async fn access_for(&self, identity: &SigningKey) -> Result<AclAccess> {
        let inner = self.inner.read().await;
        match &inner.state {
            Some(state) => state.access_for(identity),
            None => Err(GroveError::no_read_key(
                self.space_id.as_str(),
                "ledger has not been received yet",
            )),
        }
    }

    async fn require_state(&self) -> Result<AclState> {
        self.state()
            .await
            .ok_or_else(|| GroveError::not_found(format!("ledger of {} is empty", self.space_id)))
    }

    // =========================================================================
    // Record builders
    // =========================================================================

    /// Root record sealing `read_key` to the owner's signing identity
    pub fn prepare_root(
        space_id: SpaceId,
        owner: OwnerId,
        read_key: &ReadKey,
        encrypted_metadata: Vec<u8>,
        signer: &SigningKey,
    ) -> Result<AclRecord> {
        let grant = AclGrant::Root {
            owner,
            read_key_id: read_key.id(),
            sealed_read_key: seal::seal(&signer.public_key(), read_key.as_bytes())?,
            encrypted_metadata,
        };
        AclRecord::sign(space_id, None, grant, signer)
    }

    /// Add `identity` directly, sealing the current read key to it
    pub async fn prepare_add_member(
        &self,
        signer: &SigningKey,
        identity: PublicKey,
        permission: Permission,
    ) -> Result<AclRecord> {
        let state = self.require_state().await?;
        let access = state.access_for(signer)?;
        let key = access
            .current_read_key()
            .ok_or_else(|| GroveError::no_read_key(self.space_id.as_str(), "current read key unavailable"))?;
        let grant = AclGrant::AddMember {
            identity,
            permission,
            sealed_read_key: seal::seal(&identity, key.as_bytes())?,
        };
        AclRecord::sign(self.space_id.clone(), Some(state.head()), grant, signer)
    }

    /// Change a member's permission
    pub async fn prepare_change_permission(
        &self,
        signer: &SigningKey,
        identity: PublicKey,
        permission: Permission,
    ) -> Result<AclRecord> {
        let state = self.require_state().await?;
        let grant = AclGrant::ChangePermission {
            identity,
            permission,
        };
        AclRecord::sign(self.space_id.clone(), Some(state.head()), grant, signer)
    }

    /// Remove `identity`, rotating to a fresh read key
    ///
    /// Returns the record and the new key; the caller persists the key
    /// once the record is ordered.
    pub async fn prepare_remove_member(
        &self,
        signer: &SigningKey,
        identity: PublicKey,
    ) -> Result<(AclRecord, ReadKey)> {
        let state = self.require_state().await?;
        let access = state.access_for(signer)?;
        let previous = access
            .current_read_key()
            .ok_or_else(|| GroveError::no_read_key(self.space_id.as_str(), "current read key unavailable"))?;

        let new_key = ReadKey::generate();
        let mut sealed_keys = Vec::new();
        for member in state.members().filter(|m| m.identity != identity) {
            sealed_keys.push((member.identity, seal::seal(&member.identity, new_key.as_bytes())?));
        }
        let rotation = KeyRotation {
            new_read_key_id: new_key.id(),
            sealed_keys,
            previous_read_key_id: previous.id(),
            previous_key_encrypted: new_key.encrypt(previous.as_bytes(), previous.id().0.as_bytes())?,
        };
        let grant = AclGrant::RemoveMember { identity, rotation };
        let record = AclRecord::sign(self.space_id.clone(), Some(state.head()), grant, signer)?;
        Ok((record, new_key))
    }

    /// Revoke an open invite
    pub async fn prepare_revoke_invite(&self, signer: &SigningKey, invite_id: RecordId) -> Result<AclRecord> {
        let state = self.require_state().await?;
        AclRecord::sign(
            self.space_id.clone(),
            Some(state.head()),
            AclGrant::RevokeInvite { invite_id },
            signer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::crypto::SigningKey;
    use grove_core::SpaceKind;
    use grove_store::MemoryStorage;

    async fn ledger() -> (AclList, SigningKey, ReadKey, Arc<MemoryStorage>) {
        let owner = SigningKey::generate();
        let space_id = SpaceId::derive(&OwnerId::new("o"), SpaceKind::Community, &owner.public_key());
        let storage = Arc::new(MemoryStorage::new());
        let list = AclList::open(space_id.clone(), storage.clone()).await.unwrap();
        let read_key = ReadKey::generate();
        let root = AclList::prepare_root(space_id, OwnerId::new("o"), &read_key, Vec::new(), &owner).unwrap();
        list.add_records(&[root]).await.unwrap();
        (list, owner, read_key, storage)
    }

    #[tokio::test]
    async fn test_root_grants_owner_the_read_key() {
        let (list, owner, read_key, _) = ledger().await;
        let access = list.access_for(&owner).await.unwrap();
        assert_eq!(access.current_read_key(), Some(&read_key));
        assert_eq!(access.permission, Some(Permission::Owner));
    }

    #[tokio::test]
    async fn test_duplicates_are_skipped_and_persisted_records_reload() {
        let (list, owner, _, storage) = ledger().await;
        let member = SigningKey::generate();
        let add = list
            .prepare_add_member(&owner, member.public_key(), Permission::Writer)
            .await
            .unwrap();

        assert_eq!(list.add_records(&[add.clone()]).await.unwrap(), 1);
        assert_eq!(list.add_records(&[add]).await.unwrap(), 0);

        let reopened = AclList::open(list.space_id().clone(), storage).await.unwrap();
        assert_eq!(reopened.head().await, list.head().await);
        assert!(reopened.access_for(&member).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_preceding_is_conflict() {
        let (list, owner, _, _) = ledger().await;
        let first = list
            .prepare_add_member(&owner, SigningKey::generate().public_key(), Permission::Reader)
            .await
            .unwrap();
        let second = list
            .prepare_add_member(&owner, SigningKey::generate().public_key(), Permission::Reader)
            .await
            .unwrap();
        list.add_records(&[first]).await.unwrap();
        assert!(matches!(
            list.add_records(&[second]).await,
            Err(GroveError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_reader_cannot_manage() {
        let (list, owner, _, _) = ledger().await;
        let reader = SigningKey::generate();
        let add = list
            .prepare_add_member(&owner, reader.public_key(), Permission::Reader)
            .await
            .unwrap();
        list.add_records(&[add]).await.unwrap();

        let sneaky = list
            .prepare_change_permission(&reader, reader.public_key(), Permission::Admin)
            .await
            .unwrap();
        assert!(matches!(
            list.add_records(&[sneaky]).await,
            Err(GroveError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_removal_rotates_key_and_keeps_history() {
        let (list, owner, original, _) = ledger().await;
        let stays = SigningKey::generate();
        let leaves = SigningKey::generate();
        for identity in [&stays, &leaves] {
            let add = list
                .prepare_add_member(&owner, identity.public_key(), Permission::Writer)
                .await
                .unwrap();
            list.add_records(&[add]).await.unwrap();
        }

        let (remove, new_key) = list.prepare_remove_member(&owner, leaves.public_key()).await.unwrap();
        list.add_records(&[remove]).await.unwrap();

        let access = list.access_for(&stays).await.unwrap();
        assert_eq!(access.current_read_key(), Some(&new_key));
        assert!(access.read_keys.contains_key(&original.id()));

        let err = list.access_for(&leaves).await.unwrap_err();
        assert!(matches!(err, GroveError::NoReadKey { .. }));
        // Removed writers keep authorship of what they already wrote.
        assert!(access.writers.contains(&leaves.public_key()));
    }
}
