//! Effect traits shared by every Grove crate
//!
//! Only effects that all layers need live here. Seams owned by a single
//! layer sit with that layer: the ordering authority in `grove-acl`, the
//! namespace coordinator in `grove-space`, the peer transport in
//! `grove-sync`.

pub mod storage;

pub use storage::{StorageEffects, StorageError};
