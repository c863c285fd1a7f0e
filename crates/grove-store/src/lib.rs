//! # Grove Store
//!
//! Storage backends implementing [`grove_core::StorageEffects`]:
//!
//! - [`MemoryStorage`]: sorted in-memory map for tests and ephemeral replicas
//! - [`FilesystemStorage`]: atomic, checksummed, owner-only files on disk
//!
//! plus [`ReadKeyStore`], the durable home of each space's read key.

#![forbid(unsafe_code)]

pub mod filesystem;
pub mod memory;
pub mod read_keys;

pub use filesystem::{FilesystemStorage, FilesystemStorageConfig};
pub use memory::MemoryStorage;
pub use read_keys::ReadKeyStore;
