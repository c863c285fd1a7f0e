//! # Grove Space
//!
//! Everything between the ledger and the application:
//!
//! - [`header`] / [`namespace`]: signed space headers and their registry
//! - [`resolver`]: opening, creating and joining spaces ([`SpaceResolver`])
//! - [`index`]: per-space tree metadata ([`SpaceIndex`])
//! - [`access`]: fresh tree builds, validated writes and sync waits ([`TreeAccess`])
//! - [`credential`]: immutable single-change credential trees
//! - [`object`]: mutable objects as diff/snapshot trees
//! - [`replica`]: wiring for one replica ([`Replica`])
//!
//! No decrypted tree is kept between calls. Every read rebuilds from the
//! tree store against the keys the ledger grants at that moment.

#![forbid(unsafe_code)]

pub mod access;
pub mod credential;
pub mod header;
pub mod index;
pub mod namespace;
pub mod object;
pub mod replica;
pub mod resolver;

pub use access::{ChangeOrigin, HeadEvent, TreeAccess, TreeGuard};
pub use credential::{Credential, CredentialManager};
pub use header::SpaceHeader;
pub use index::{EntryStatus, ObjectIndexEntry, SpaceIndex};
pub use namespace::{LocalNamespaceRegistry, NamespaceCoordinator};
pub use object::{ChangeOp, Fields, Object, ObjectContent, ObjectManager, Operation, UpdateOutcome};
pub use replica::Replica;
pub use resolver::{OwnerMetadata, Space, SpaceResolver};
