//! Storage layer for vault objects.
//!
//! This module handles:
//! - Locating objects inside the fan-out vault layout
//! - Reading/writing encrypted objects and blobs atomically
//! - Listing objects and pruning emptied fan-out directories

pub mod fs;
mod layout;
pub mod object;

pub use layout::{fanout_path, VaultLayout};
