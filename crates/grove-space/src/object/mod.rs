//! Object trees
//!
//! Objects are mutable field maps stored as append-only trees. The root
//! is a snapshot; later changes are minimal diffs, with a full snapshot
//! every `snapshot_interval` changes so replay stays short.

mod manager;
pub mod ops;

pub use manager::{Object, ObjectManager, UpdateOutcome};
pub use ops::{apply, diff, replay, ChangeOp, Fields, ObjectContent, Operation};
