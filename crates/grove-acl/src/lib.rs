//! # Grove ACL
//!
//! The permission ledger of a space: an append-only chain of signed
//! records deciding who holds the read key and who may write.
//!
//! - [`record`]: grants, permissions and signed records
//! - [`state`]: deterministic reduction of a chain into [`AclState`]
//! - [`list`]: the persisted local replica ([`AclList`]) and record builders
//! - [`authority`]: the [`OrderingAuthority`] seam and a single-node implementation
//! - [`invite`]: issuing and redeeming invites

#![forbid(unsafe_code)]

pub mod authority;
pub mod invite;
pub mod list;
pub mod record;
pub mod state;

pub use authority::{AclAck, LocalOrderingAuthority, OrderingAuthority};
pub use invite::{catch_up, issue_invite, membership_state, submit_join, InviteSecret, JoinReceipt, MembershipState};
pub use list::AclList;
pub use record::{join_message, AclGrant, AclPayload, AclRecord, KeyRotation, Permission};
pub use state::{AclAccess, AclState, Member, PendingInvite};
