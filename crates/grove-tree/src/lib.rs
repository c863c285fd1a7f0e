//! # Grove Tree
//!
//! Per-object append logs. A tree is a DAG of signed change records whose
//! content is encrypted under the space read key:
//!
//! - [`change`]: change payloads, headers and the signed wire form
//! - [`validation`]: key-free structural and signature validation
//! - [`tree`]: the decrypted [`ObjectTree`], built fresh from changes
//! - [`keys`]: the ledger projection a tree is built against
//! - [`storage`]: the persistent [`TreeStore`]

#![forbid(unsafe_code)]

pub mod change;
pub mod keys;
pub mod storage;
pub mod tree;
pub mod validation;

pub use change::{ChangePayload, RawChange, TreeHeader, TreeKind};
pub use keys::TreeKeys;
pub use storage::TreeStore;
pub use tree::{DecryptedChange, ObjectTree};
pub use validation::{head_hash, validate_tree, ValidatedChange, ValidatedTree};
