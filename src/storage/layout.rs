//! Vault directory layout.
//!
//! ```text
//! <vault>/csmaster
//! <vault>/h/<first 8 chars>/<rest>   head entries, by opaque name
//! <vault>/f/<first 8 chars>/<rest>   file entries, by identifier
//! <vault>/d/<first 8 chars>/<rest>   content blobs, by checksum
//! ```

use crate::config::{
    DATA_DIRECTORY_NAME, FANOUT_PREFIX_LENGTH, FILE_DIRECTORY_NAME, HEAD_DIRECTORY_NAME,
    MASTER_VAULT_FILE_NAME,
};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Split a name into `<prefix>/<rest>` for fan-out.
///
/// Names too short to split stay flat.
pub fn fanout_path(name: &str) -> PathBuf {
    if name.len() > FANOUT_PREFIX_LENGTH && name.is_char_boundary(FANOUT_PREFIX_LENGTH) {
        let (prefix, rest) = name.split_at(FANOUT_PREFIX_LENGTH);
        Path::new(prefix).join(rest)
    } else {
        PathBuf::from(name)
    }
}

/// Paths of every object inside one vault directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    /// Layout rooted at a vault directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The vault directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The master vault object.
    pub fn master_vault(&self) -> PathBuf {
        self.root.join(MASTER_VAULT_FILE_NAME)
    }

    /// Directory of head entry objects.
    pub fn head_directory(&self) -> PathBuf {
        self.root.join(HEAD_DIRECTORY_NAME)
    }

    /// Directory of file entry objects.
    pub fn file_directory(&self) -> PathBuf {
        self.root.join(FILE_DIRECTORY_NAME)
    }

    /// Directory of content blobs.
    pub fn data_directory(&self) -> PathBuf {
        self.root.join(DATA_DIRECTORY_NAME)
    }

    /// Head entry object for an opaque name.
    pub fn head_object(&self, opaque_name: &str) -> PathBuf {
        self.head_directory().join(fanout_path(opaque_name))
    }

    /// File entry object for an identifier.
    pub fn file_object(&self, id: &Uuid) -> PathBuf {
        self.file_directory()
            .join(fanout_path(&id.simple().to_string()))
    }

    /// Content blob for a checksum.
    pub fn data_blob(&self, checksum: &str) -> PathBuf {
        self.data_directory().join(fanout_path(checksum))
    }
}
