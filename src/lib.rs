//! CoreSync
//!
//! Encrypted, content-addressed, deduplicating synchronization of a plaintext
//! directory with a vault directory that several participants may share.
//!
//! # Features
//!
//! - **Opaque vault**: paths, names and content are encrypted; object names are keyed hashes
//! - **AES-256-GCM Encryption**: authenticated encryption with Argon2id / HKDF key derivation
//! - **Deduplication**: identical content is stored once, whatever its path
//! - **Four-phase sync**: deletions and additions propagate in both directions
//! - **CLI Interface**: `init`, `config`, `filter`, `sync`, `detach`, `reset`
//!
//! # Architecture
//!
//! ```text
//! passphrase → csmaster → h/ (tree index) → f/ (file entries) → d/ (content blobs)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use coresync::{InitOptions, Vault};
//! use secrecy::SecretString;
//! use std::path::Path;
//!
//! let mut vault = Vault::initialize(
//!     Path::new("./documents"),
//!     SecretString::from("passphrase"),
//!     InitOptions::default(),
//! ).unwrap();
//!
//! let report = vault.synchronize(None).unwrap();
//! println!("{report}");
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod filter;
pub mod logging;
pub mod protector;
pub mod storage;
pub mod vault;

pub use config::{Configuration, InitOptions, KdfParams};
pub use error::{Error, ErrorKind, Result};
pub use protector::ProtectorKind;
pub use vault::{SyncReport, Vault};
