//! CLI command handlers

pub mod common;
pub mod credential;
pub mod keys;
pub mod object;
pub mod space;
