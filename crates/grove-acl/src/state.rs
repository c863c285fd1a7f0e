//! Ledger state reduction
//!
//! [`AclState`] is derived by replaying records in chain order. Each
//! record is checked against the state before it: the chain link, the
//! actor's signature and the actor's rights. State is never persisted;
//! only records are.

use grove_core::crypto::{seal, PublicKey, ReadKey, ReadKeyId, SigningKey};
use grove_core::{GroveError, OwnerId, RecordId, Result, SpaceId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;
use zeroize::Zeroizing;

use crate::record::{join_message, AclGrant, AclRecord, Permission};

/// A current member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Signing identity
    pub identity: PublicKey,
    /// Permission level
    pub permission: Permission,
    /// Read keys sealed to this member, by key id
    pub sealed_read_keys: BTreeMap<ReadKeyId, Vec<u8>>,
}

/// An invite that has been issued but not redeemed or revoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvite {
    /// Invite record id
    pub invite_id: RecordId,
    /// Public invite key
    pub invite_key: PublicKey,
    /// Permission the joiner receives
    pub permission: Permission,
    /// Id of the sealed read key
    pub read_key_id: ReadKeyId,
    /// Read key sealed to the invite key
    pub sealed_read_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rotation {
    previous: ReadKeyId,
    previous_key_encrypted: Vec<u8>,
}

/// Access material this replica can unlock from the ledger
#[derive(Debug, Clone)]
pub struct AclAccess {
    /// Space
    pub space_id: SpaceId,
    /// The ledger's registered owner identity
    pub owner: PublicKey,
    /// Permission of the requesting identity, if a member
    pub permission: Option<Permission>,
    /// Every read key the identity can reach, current and historical
    pub read_keys: BTreeMap<ReadKeyId, ReadKey>,
    /// Current read key id
    pub current_read_key_id: ReadKeyId,
    /// Identities that ever held write permission
    pub writers: BTreeSet<PublicKey>,
}

impl AclAccess {
    /// The current read key, if reachable
    pub fn current_read_key(&self) -> Option<&ReadKey> {
        self.read_keys.get(&self.current_read_key_id)
    }
}

/// Membership as reduced from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclState {
    space_id: SpaceId,
    owner: OwnerId,
    owner_identity: PublicKey,
    root_id: RecordId,
    head: RecordId,
    len: u64,
    current_read_key_id: ReadKeyId,
    encrypted_metadata: Vec<u8>,
    members: BTreeMap<PublicKey, Member>,
    removed: BTreeSet<PublicKey>,
    writers: BTreeSet<PublicKey>,
    invites: BTreeMap<RecordId, PendingInvite>,
    closed_invites: BTreeMap<RecordId, Option<PublicKey>>,
    rotations: BTreeMap<ReadKeyId, Rotation>,
}

impl AclState {
    /// Start a state from a root record
    pub fn from_root(record: &AclRecord) -> Result<Self> {
        record.verify_signature()?;
        let AclGrant::Root {
            owner,
            read_key_id,
            sealed_read_key,
            encrypted_metadata,
        } = &record.payload.grant
        else {
            return Err(GroveError::invalid("ledger must start with a root record"));
        };
        if record.payload.preceding.is_some() {
            return Err(GroveError::invalid("root record cannot have a predecessor"));
        }

        let actor = record.payload.actor;
        let id = record.id();
        let mut members = BTreeMap::new();
        members.insert(
            actor,
            Member {
                identity: actor,
                permission: Permission::Owner,
                sealed_read_keys: BTreeMap::from([(*read_key_id, sealed_read_key.clone())]),
            },
        );

        Ok(Self {
            space_id: record.payload.space_id.clone(),
            owner: owner.clone(),
            owner_identity: actor,
            root_id: id,
            head: id,
            len: 1,
            current_read_key_id: *read_key_id,
            encrypted_metadata: encrypted_metadata.clone(),
            members,
            removed: BTreeSet::new(),
            writers: BTreeSet::from([actor]),
            invites: BTreeMap::new(),
            closed_invites: BTreeMap::new(),
            rotations: BTreeMap::new(),
        })
    }

    /// Replay a full chain
    pub fn replay(records: &[AclRecord]) -> Result<Self> {
        let (root, rest) = records
            .split_first()
            .ok_or_else(|| GroveError::invalid("empty ledger"))?;
        let mut state = Self::from_root(root)?;
        for record in rest {
            state.apply(record)?;
        }
        Ok(state)
    }

    /// Validate `record` against this state and apply it
    pub fn apply(&mut self, record: &AclRecord) -> Result<()> {
        let payload = &record.payload;
        if payload.space_id != self.space_id {
            return Err(GroveError::invalid(format!(
                "record for space {} applied to {}",
                payload.space_id, self.space_id
            )));
        }
        if payload.preceding != Some(self.head) {
            return Err(GroveError::conflict(format!(
                "record does not follow ledger head {}",
                self.head
            )));
        }
        record.verify_signature()?;

        let actor = payload.actor;
        match &payload.grant {
            AclGrant::Root { .. } => {
                return Err(GroveError::invalid("second root record"));
            }
            AclGrant::Invite {
                invite_key,
                permission,
                read_key_id,
                sealed_read_key,
            } => {
                self.require_manager(&actor)?;
                Self::require_grantable(*permission)?;
                if *read_key_id != self.current_read_key_id {
                    return Err(GroveError::invalid("invite must carry the current read key"));
                }
                let invite_id = record.id();
                self.invites.insert(
                    invite_id,
                    PendingInvite {
                        invite_id,
                        invite_key: *invite_key,
                        permission: *permission,
                        read_key_id: *read_key_id,
                        sealed_read_key: sealed_read_key.clone(),
                    },
                );
            }
            AclGrant::Join {
                invite_id,
                invite_signature,
                sealed_read_key,
            } => {
                if self.members.contains_key(&actor) {
                    return Err(GroveError::conflict(format!("{actor} is already a member")));
                }
                let invite = self.invites.get(invite_id).ok_or_else(|| {
                    GroveError::permission_denied(format!("invite {invite_id} is not open"))
                })?;
                invite
                    .invite_key
                    .verify(&join_message(&self.space_id, invite_id, &actor), invite_signature)
                    .map_err(|_| GroveError::signature("join is not signed by the invite key"))?;

                let member = Member {
                    identity: actor,
                    permission: invite.permission,
                    sealed_read_keys: BTreeMap::from([(invite.read_key_id, sealed_read_key.clone())]),
                };
                if member.permission.can_write() {
                    self.writers.insert(actor);
                }
                self.invites.remove(invite_id);
                self.closed_invites.insert(*invite_id, Some(actor));
                self.removed.remove(&actor);
                self.members.insert(actor, member);
            }
            AclGrant::AddMember {
                identity,
                permission,
                sealed_read_key,
            } => {
                self.require_manager(&actor)?;
                Self::require_grantable(*permission)?;
                if self.members.contains_key(identity) {
                    return Err(GroveError::conflict(format!("{identity} is already a member")));
                }
                if permission.can_write() {
                    self.writers.insert(*identity);
                }
                self.removed.remove(identity);
                self.members.insert(
                    *identity,
                    Member {
                        identity: *identity,
                        permission: *permission,
                        sealed_read_keys: BTreeMap::from([(
                            self.current_read_key_id,
                            sealed_read_key.clone(),
                        )]),
                    },
                );
            }
            AclGrant::ChangePermission {
                identity,
                permission,
            } => {
                let actor_permission = self.require_manager(&actor)?;
                Self::require_grantable(*permission)?;
                let target = self
                    .members
                    .get_mut(identity)
                    .ok_or_else(|| GroveError::not_found(format!("{identity} is not a member")))?;
                if target.permission >= actor_permission && actor_permission != Permission::Owner {
                    return Err(GroveError::permission_denied(
                        "cannot change the permission of an equal or higher member",
                    ));
                }
                if target.permission == Permission::Owner {
                    return Err(GroveError::permission_denied("the owner cannot be re-permissioned"));
                }
                target.permission = *permission;
                if permission.can_write() {
                    self.writers.insert(*identity);
                }
            }
            AclGrant::RemoveMember { identity, rotation } => {
                let actor_permission = self.require_manager(&actor)?;
                let target = self
                    .members
                    .get(identity)
                    .ok_or_else(|| GroveError::not_found(format!("{identity} is not a member")))?;
                if target.permission == Permission::Owner
                    || (target.permission >= actor_permission && actor_permission != Permission::Owner)
                {
                    return Err(GroveError::permission_denied(format!("{actor} may not remove {identity}")));
                }
                if rotation.previous_read_key_id != self.current_read_key_id {
                    return Err(GroveError::invalid("rotation does not replace the current read key"));
                }

                let remaining: BTreeSet<PublicKey> =
                    self.members.keys().filter(|k| *k != identity).copied().collect();
                let sealed: BTreeMap<PublicKey, Vec<u8>> = rotation.sealed_keys.iter().cloned().collect();
                if sealed.keys().copied().collect::<BTreeSet<_>>() != remaining {
                    return Err(GroveError::invalid(
                        "rotation must seal the new key to exactly the remaining members",
                    ));
                }

                self.members.remove(identity);
                self.removed.insert(*identity);
                for (member_key, blob) in sealed {
                    if let Some(member) = self.members.get_mut(&member_key) {
                        member
                            .sealed_read_keys
                            .insert(rotation.new_read_key_id, blob);
                    }
                }
                self.rotations.insert(
                    rotation.new_read_key_id,
                    Rotation {
                        previous: rotation.previous_read_key_id,
                        previous_key_encrypted: rotation.previous_key_encrypted.clone(),
                    },
                );
                self.current_read_key_id = rotation.new_read_key_id;

                // Invites carry the old key; they die with it.
                let open: Vec<RecordId> = self.invites.keys().copied().collect();
                for invite_id in open {
                    self.invites.remove(&invite_id);
                    self.closed_invites.insert(invite_id, None);
                }
            }
            AclGrant::RevokeInvite { invite_id } => {
                self.require_manager(&actor)?;
                if self.invites.remove(invite_id).is_none() {
                    return Err(GroveError::not_found(format!("invite {invite_id} is not open")));
                }
                self.closed_invites.insert(*invite_id, None);
            }
        }

        self.head = record.id();
        self.len += 1;
        trace!(space = %self.space_id, grant = payload.grant.kind(), len = self.len, "applied ledger record");
        Ok(())
    }

    fn require_manager(&self, actor: &PublicKey) -> Result<Permission> {
        match self.members.get(actor) {
            Some(member) if member.permission.can_manage() => Ok(member.permission),
            Some(_) => Err(GroveError::permission_denied(format!("{actor} may not manage membership"))),
            None => Err(GroveError::permission_denied(format!("{actor} is not a member"))),
        }
    }

    fn require_grantable(permission: Permission) -> Result<()> {
        if permission == Permission::Owner {
            return Err(GroveError::permission_denied("owner permission cannot be granted"));
        }
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Space
    pub fn space_id(&self) -> &SpaceId {
        &self.space_id
    }

    /// Application owner identifier from the root
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Signing identity of the owner
    pub fn owner_identity(&self) -> &PublicKey {
        &self.owner_identity
    }

    /// Root record id
    pub fn root_id(&self) -> RecordId {
        self.root_id
    }

    /// Latest record id
    pub fn head(&self) -> RecordId {
        self.head
    }

    /// Number of records applied
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Always false; a state has at least its root
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current read key id
    pub fn current_read_key_id(&self) -> ReadKeyId {
        self.current_read_key_id
    }

    /// Owner metadata sealed to the metadata key
    pub fn encrypted_metadata(&self) -> &[u8] {
        &self.encrypted_metadata
    }

    /// Current member, if any
    pub fn member(&self, identity: &PublicKey) -> Option<&Member> {
        self.members.get(identity)
    }

    /// All current members
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Whether `identity` was removed and not re-added
    pub fn is_removed(&self, identity: &PublicKey) -> bool {
        self.removed.contains(identity)
    }

    /// Open invite, if any
    pub fn invite(&self, invite_id: &RecordId) -> Option<&PendingInvite> {
        self.invites.get(invite_id)
    }

    /// Who redeemed a closed invite (`Some(None)` when revoked or expired)
    pub fn closed_invite(&self, invite_id: &RecordId) -> Option<Option<PublicKey>> {
        self.closed_invites.get(invite_id).copied()
    }

    /// Every identity that holds or ever held write permission
    pub fn writers(&self) -> &BTreeSet<PublicKey> {
        &self.writers
    }

    /// Open invites
    pub fn open_invites(&self) -> impl Iterator<Item = &PendingInvite> {
        self.invites.values()
    }

    /// Unlock every read key reachable by `identity`
    ///
    /// Keys sealed directly to the member are opened, then each rotation is
    /// walked backwards so history written before the member joined (or
    /// before a rotation) stays readable. Fails with `NoReadKey` when the
    /// identity holds no key in this state.
    pub fn access_for(&self, identity: &SigningKey) -> Result<AclAccess> {
        let public = identity.public_key();
        let member = self.members.get(&public);

        let mut read_keys = BTreeMap::new();
        if let Some(member) = member {
            for (key_id, sealed) in &member.sealed_read_keys {
                let opened = Zeroizing::new(seal::open(identity, sealed)?);
                let key = ReadKey::from_slice(&opened)?;
                if key.id() != *key_id {
                    return Err(GroveError::crypto(format!("sealed key does not match id {key_id}")));
                }
                read_keys.insert(*key_id, key);
            }
        }

        // Follow rotations back from every key we hold.
        let mut frontier: Vec<ReadKeyId> = read_keys.keys().copied().collect();
        while let Some(key_id) = frontier.pop() {
            let Some(rotation) = self.rotations.get(&key_id) else {
                continue;
            };
            if read_keys.contains_key(&rotation.previous) {
                continue;
            }
            let Some(newer) = read_keys.get(&key_id) else {
                continue;
            };
            let opened = Zeroizing::new(
                newer.decrypt(&rotation.previous_key_encrypted, rotation.previous.0.as_bytes())?,
            );
            let previous = ReadKey::from_slice(&opened)?;
            read_keys.insert(rotation.previous, previous);
            frontier.push(rotation.previous);
        }

        if read_keys.is_empty() {
            return Err(GroveError::no_read_key(
                self.space_id.as_str(),
                format!("ledger at {} grants no read key to {public}", self.head),
            ));
        }

        Ok(AclAccess {
            space_id: self.space_id.clone(),
            owner: self.owner_identity,
            permission: member.map(|m| m.permission),
            read_keys,
            current_read_key_id: self.current_read_key_id,
            writers: self.writers.clone(),
        })
    }
}
