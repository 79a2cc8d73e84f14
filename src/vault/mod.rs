//! The vault engine.
//!
//! - [`MasterVault`]: secrets shared by all participants of a vault
//! - [`HeadEntry`] / [`TreeIndex`]: the encrypted tree index
//! - [`FileEntry`] / [`FileStore`]: deduplicated, encrypted content
//! - [`Repository`]: this participant's ledger
//! - [`Synchronizer`]: the four-phase reconciliation
//! - [`Vault`]: operations exposed to callers

mod context;
mod file_store;
mod head_entry;
mod master;
mod operations;
mod repository;
mod sync;

pub use context::VaultContext;
pub use file_store::{FileEntry, FileStore};
pub use head_entry::{HeadEntry, TreeIndex};
pub use master::MasterVault;
pub use operations::Vault;
pub use repository::Repository;
pub use sync::{SyncReport, Synchronizer};
