//! Invite / join protocol
//!
//! ```text
//!  member                       authority                    invitee
//!    | issue_invite ------------->|                             |
//!    |   (read key sealed to a    |                             |
//!    |    one-off invite key)     |                             |
//!    | ---------- InviteSecret (out of band) ------------------> |
//!    |                            |<------------- submit_join --|
//!    |                            |  (key re-sealed to invitee, |
//!    |                            |   signed by the invite key) |
//!    |                            |---------- JoinReceipt ----->|
//!    |                            |                  open space |
//! ```
//!
//! The join must be acknowledged before the invitee opens the space so the
//! first content sync already finds the invitee in the ledger.

use grove_core::crypto::{seal, ReadKey, SigningKey};
use grove_core::{GroveError, PublicKey, RecordId, Result, SpaceId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::authority::{AclAck, OrderingAuthority};
use crate::list::AclList;
use crate::record::{join_message, AclGrant, AclRecord, Permission};
use crate::state::AclState;

/// Attempts before giving up when the ledger head keeps moving
const SUBMIT_ATTEMPTS: usize = 5;

/// Where a prospective member stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    /// Invite is open in the ledger
    Invited,
    /// Join was acknowledged but this replica's ledger has not caught up
    JoinSubmitted,
    /// Ledger lists the identity as a member
    Member,
}

/// Everything an invitee needs to redeem an invite
///
/// Handed over out of band. Whoever holds it can join, so treat it like a
/// password.
#[derive(Clone)]
pub struct InviteSecret {
    /// Space
    pub space_id: SpaceId,
    /// Invite record
    pub invite_id: RecordId,
    /// One-off invite key
    pub invite_key: SigningKey,
}

impl std::fmt::Debug for InviteSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteSecret")
            .field("space_id", &self.space_id)
            .field("invite_id", &self.invite_id)
            .finish_non_exhaustive()
    }
}

impl InviteSecret {
    /// Encode as `<space>:<invite>:<key hex>`
    pub fn to_token(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "{}:{}:{}",
            self.space_id,
            self.invite_id,
            hex::encode(*self.invite_key.to_bytes())
        ))
    }

    /// Parse a token produced by [`InviteSecret::to_token`]
    pub fn from_token(token: &str) -> Result<Self> {
        let mut parts = token.trim().splitn(3, ':');
        let (Some(space), Some(invite), Some(key)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GroveError::invalid("malformed invite token"));
        };
        let key_bytes = Zeroizing::new(
            hex::decode(key).map_err(|_| GroveError::invalid("malformed invite key"))?,
        );
        let key_array: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| GroveError::invalid("invite key must be 32 bytes"))?;
        Ok(Self {
            space_id: space.parse()?,
            invite_id: invite.parse()?,
            invite_key: SigningKey::from_bytes(&key_array),
        })
    }
}

/// Proof that a join was ordered
#[derive(Debug, Clone)]
pub struct JoinReceipt {
    /// Acknowledgement from the authority
    pub ack: AclAck,
    /// Joiner identity
    pub identity: PublicKey,
    /// Ledger up to and including the join record
    pub records: Vec<AclRecord>,
}

impl JoinReceipt {
    /// Space joined
    pub fn space_id(&self) -> &SpaceId {
        &self.ack.space_id
    }

    /// Membership as seen through a local ledger
    pub fn membership(&self, local: Option<&AclState>) -> MembershipState {
        match local {
            Some(state) if state.member(&self.identity).is_some() => MembershipState::Member,
            _ => MembershipState::JoinSubmitted,
        }
    }
}

/// Membership of `identity` with respect to `invite_id` in `state`
pub fn membership_state(state: &AclState, invite_id: &RecordId, identity: &PublicKey) -> Option<MembershipState> {
    if state.member(identity).is_some() {
        return Some(MembershipState::Member);
    }
    if state.invite(invite_id).is_some() {
        return Some(MembershipState::Invited);
    }
    None
}

/// Issue an invite granting `permission`, ordered through `authority`
pub async fn issue_invite(
    list: &AclList,
    authority: &dyn OrderingAuthority,
    signer: &SigningKey,
    permission: Permission,
) -> Result<InviteSecret> {
    let invite_key = SigningKey::generate();

    for attempt in 1..=SUBMIT_ATTEMPTS {
        let state = list
            .state()
            .await
            .ok_or_else(|| GroveError::not_found(format!("ledger of {} is empty", list.space_id())))?;
        let access = state.access_for(signer)?;
        let read_key = access.current_read_key().ok_or_else(|| {
            GroveError::no_read_key(list.space_id().as_str(), "current read key unavailable")
        })?;

        let grant = AclGrant::Invite {
            invite_key: invite_key.public_key(),
            permission,
            read_key_id: read_key.id(),
            sealed_read_key: seal::seal(&invite_key.public_key(), read_key.as_bytes())?,
        };
        let record = AclRecord::sign(list.space_id().clone(), Some(state.head()), grant, signer)?;

        match authority.submit(record.clone()).await {
            Ok(ack) => {
                catch_up(list, authority).await?;
                info!(space = %list.space_id(), invite = %ack.record_id, %permission, "issued invite");
                return Ok(InviteSecret {
                    space_id: list.space_id().clone(),
                    invite_id: ack.record_id,
                    invite_key,
                });
            }
            Err(GroveError::Conflict { message }) => {
                warn!(space = %list.space_id(), attempt, %message, "ledger moved, catching up before retrying invite");
                catch_up(list, authority).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Err(GroveError::conflict("ledger head kept moving while issuing invite"))
}

/// Redeem an invite as `identity`
///
/// Reads the ordered ledger from the authority, unseals the read key with
/// the invite key, re-seals it to `identity` and submits the join. The
/// receipt carries the ledger so the joiner can seed its local replica
/// before opening the space.
pub async fn submit_join(
    authority: &dyn OrderingAuthority,
    secret: &InviteSecret,
    identity: &SigningKey,
) -> Result<JoinReceipt> {
    let public = identity.public_key();

    for attempt in 1..=SUBMIT_ATTEMPTS {
        let records = authority.records_after(&secret.space_id, None).await?;
        let state = AclState::replay(&records)?;

        if state.member(&public).is_some() {
            // Already ordered, e.g. a retry after a lost acknowledgement.
            let position = records.len().saturating_sub(1) as u64;
            return Ok(JoinReceipt {
                ack: AclAck {
                    space_id: secret.space_id.clone(),
                    record_id: state.head(),
                    position,
                },
                identity: public,
                records,
            });
        }

        let invite = state.invite(&secret.invite_id).ok_or_else(|| {
            GroveError::permission_denied(format!("invite {} is not open", secret.invite_id))
        })?;
        let opened = Zeroizing::new(seal::open(&secret.invite_key, &invite.sealed_read_key)?);
        let read_key = ReadKey::from_slice(&opened)?;

        let invite_signature = secret
            .invite_key
            .sign(&join_message(&secret.space_id, &secret.invite_id, &public));
        let grant = AclGrant::Join {
            invite_id: secret.invite_id,
            invite_signature,
            sealed_read_key: seal::seal(&public, read_key.as_bytes())?,
        };
        let record = AclRecord::sign(secret.space_id.clone(), Some(state.head()), grant, identity)?;

        match authority.submit(record.clone()).await {
            Ok(ack) => {
                let mut records = records;
                records.push(record);
                info!(space = %secret.space_id, position = ack.position, "join acknowledged");
                return Ok(JoinReceipt {
                    ack,
                    identity: public,
                    records,
                });
            }
            Err(GroveError::Conflict { message }) => {
                warn!(space = %secret.space_id, attempt, %message, "ledger moved, retrying join");
            }
            Err(e) => return Err(e),
        }
    }
    Err(GroveError::conflict("ledger head kept moving while joining"))
}

/// Pull records the local ledger is missing from the authority
pub async fn catch_up(list: &AclList, authority: &dyn OrderingAuthority) -> Result<usize> {
    let records = authority.records_after(list.space_id(), list.head().await).await?;
    list.add_records(&records).await
}
