//! Head entries: the tree index of the vault.
//!
//! A head entry maps a relative path to either a directory or a file entry.
//! Its object name is a keyed hash of the path and content checksum, so every
//! participant derives the same name for the same (path, content) pair.

use crate::crypto::KdfMode;
use crate::error::{Error, Result};
use crate::storage::{fs, object, VaultLayout};
use crate::vault::file_store::FileEntry;
use crate::vault::master::MasterVault;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// One path in the synchronized tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadEntry {
    #[serde(rename = "name")]
    relative_path: String,
    #[serde(rename = "file_name")]
    opaque_name: String,
    #[serde(rename = "file_id", default, skip_serializing_if = "Option::is_none")]
    file_id: Option<Uuid>,
}

impl HeadEntry {
    /// Entry for a directory.
    pub fn directory(relative_path: &str, keys: &MasterVault) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            opaque_name: keys.opaque_name(relative_path, None),
            file_id: None,
        }
    }

    /// Entry for a file with known content.
    pub fn file(relative_path: &str, file_entry: &FileEntry, keys: &MasterVault) -> Self {
        Self {
            relative_path: relative_path.to_string(),
            opaque_name: keys.opaque_name(relative_path, Some(file_entry.checksum())),
            file_id: Some(file_entry.id()),
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn opaque_name(&self) -> &str {
        &self.opaque_name
    }

    pub fn file_id(&self) -> Option<Uuid> {
        self.file_id
    }

    pub fn is_file(&self) -> bool {
        self.file_id.is_some()
    }

    pub fn is_directory(&self) -> bool {
        self.file_id.is_none()
    }

    /// Whether this entry lies strictly below `directory`.
    pub fn is_below(&self, directory: &str) -> bool {
        self.relative_path.len() > directory.len() + 1
            && self.relative_path.starts_with(directory)
            && self.relative_path.as_bytes()[directory.len()] == b'/'
    }

    /// Whether this entry is `scope` or lies below it.
    pub fn is_within(&self, scope: &str) -> bool {
        self.relative_path == scope || self.is_below(scope)
    }

    /// Whether the opaque name is the one derived from this entry's path and
    /// the given content. Directories pass `None`.
    pub fn is_named_for(&self, keys: &MasterVault, file_entry: Option<&FileEntry>) -> bool {
        if file_entry.map(FileEntry::id) != self.file_id {
            return false;
        }
        let checksum = file_entry.map(FileEntry::checksum);
        keys.opaque_name(&self.relative_path, checksum) == self.opaque_name
    }
}

/// Head entry objects in the vault.
pub struct TreeIndex<'a> {
    layout: &'a VaultLayout,
    keys: &'a MasterVault,
}

impl<'a> TreeIndex<'a> {
    pub fn new(layout: &'a VaultLayout, keys: &'a MasterVault) -> Self {
        Self { layout, keys }
    }

    /// Opaque names of every head entry in the vault.
    pub fn list(layout: &VaultLayout) -> Result<BTreeSet<String>> {
        fs::list_fanout_names(&layout.head_directory())
    }

    /// Whether a head entry object exists.
    pub fn exists(&self, opaque_name: &str) -> bool {
        self.layout.head_object(opaque_name).is_file()
    }

    /// Encrypt a head entry into the vault.
    pub fn write(&self, entry: &HeadEntry) -> Result<()> {
        object::write_object(
            &self.layout.head_object(entry.opaque_name()),
            entry,
            self.keys.head_entry_passphrase(),
            KdfMode::Secret,
        )
    }

    /// Decrypt and validate a head entry.
    ///
    /// The decrypted entry must name the object it was read from and carry a
    /// safe relative path. A directory's name is recomputed from its path; a
    /// file's name also depends on its content, which callers check with
    /// [`HeadEntry::is_named_for`] once the file entry is resolved.
    pub fn read(&self, opaque_name: &str) -> Result<HeadEntry> {
        let entry: HeadEntry = object::read_object(
            &self.layout.head_object(opaque_name),
            self.keys.head_entry_passphrase(),
            KdfMode::Secret,
        )?;

        if entry.opaque_name != opaque_name {
            return Err(Error::InvalidEntry(format!(
                "head entry {opaque_name} claims name {}",
                entry.opaque_name
            )));
        }
        if !fs::is_safe_relative_path(&entry.relative_path) {
            return Err(Error::InvalidEntry(format!(
                "head entry {opaque_name} has unsafe path {:?}",
                entry.relative_path
            )));
        }
        if entry.is_directory() && !entry.is_named_for(self.keys, None) {
            return Err(Error::InvalidEntry(format!(
                "head entry {opaque_name} is not named for directory {:?}",
                entry.relative_path
            )));
        }
        Ok(entry)
    }

    /// Delete a head entry object and its emptied fan-out parent.
    pub fn delete(&self, entry: &HeadEntry) -> Result<bool> {
        fs::remove_file_and_empty_parents(
            &self.layout.head_object(entry.opaque_name()),
            &self.layout.head_directory(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_and_file_names_differ() {
        let keys = MasterVault::generate();
        let file_entry = FileEntry::new(Uuid::new_v4(), "abc".to_string());

        let dir = HeadEntry::directory("docs", &keys);
        let file = HeadEntry::file("docs", &file_entry, &keys);

        assert!(dir.is_directory());
        assert!(file.is_file());
        assert_ne!(dir.opaque_name(), file.opaque_name());
    }

    #[test]
    fn test_same_path_and_content_same_name() {
        let keys = MasterVault::generate();
        let a = FileEntry::new(Uuid::new_v4(), "abc".to_string());
        let b = FileEntry::new(Uuid::new_v4(), "abc".to_string());

        assert_eq!(
            HeadEntry::file("x.txt", &a, &keys).opaque_name(),
            HeadEntry::file("x.txt", &b, &keys).opaque_name()
        );
    }

    #[test]
    fn test_is_below() {
        let keys = MasterVault::generate();
        let entry = HeadEntry::directory("docs/sub", &keys);

        assert!(entry.is_below("docs"));
        assert!(!entry.is_below("doc"));
        assert!(!entry.is_below("docs/sub"));
        assert!(entry.is_within("docs/sub"));
        assert!(!HeadEntry::directory("docsub", &keys).is_below("docs"));
    }

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        let keys = MasterVault::generate();
        let index = TreeIndex::new(&layout, &keys);

        let entry = HeadEntry::directory("photos", &keys);
        index.write(&entry).unwrap();
        assert!(index.exists(entry.opaque_name()));
        assert!(TreeIndex::list(&layout)
            .unwrap()
            .contains(entry.opaque_name()));

        assert_eq!(index.read(entry.opaque_name()).unwrap(), entry);

        assert!(index.delete(&entry).unwrap());
        assert!(TreeIndex::list(&layout).unwrap().is_empty());
        assert!(layout.head_directory().read_dir().unwrap().next().is_none());
    }

    #[test]
    fn test_read_rejects_misnamed_object() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        let keys = MasterVault::generate();
        let index = TreeIndex::new(&layout, &keys);

        let entry = HeadEntry::directory("photos", &keys);
        index.write(&entry).unwrap();

        let other = "0".repeat(64);
        std::fs::create_dir_all(layout.head_object(&other).parent().unwrap()).unwrap();
        std::fs::copy(
            layout.head_object(entry.opaque_name()),
            layout.head_object(&other),
        )
        .unwrap();

        assert!(matches!(index.read(&other), Err(Error::InvalidEntry(_))));
    }

    #[test]
    fn test_read_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        let keys = MasterVault::generate();
        let index = TreeIndex::new(&layout, &keys);

        let mut entry = HeadEntry::directory("safe", &keys);
        entry.relative_path = "../outside".to_string();
        index.write(&entry).unwrap();

        assert!(matches!(
            index.read(entry.opaque_name()),
            Err(Error::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_read_rejects_directory_with_forged_path() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        let keys = MasterVault::generate();
        let index = TreeIndex::new(&layout, &keys);

        // Object name and stored name agree, but belong to another path
        let mut entry = HeadEntry::directory("photos", &keys);
        entry.relative_path = "documents".to_string();
        index.write(&entry).unwrap();

        assert!(matches!(
            index.read(entry.opaque_name()),
            Err(Error::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_file_name_must_match_content() {
        let keys = MasterVault::generate();
        let stored = FileEntry::new(Uuid::new_v4(), "abc".to_string());
        let entry = HeadEntry::file("x.txt", &stored, &keys);
        assert!(entry.is_named_for(&keys, Some(&stored)));

        let other_content = FileEntry::new(stored.id(), "abd".to_string());
        assert!(!entry.is_named_for(&keys, Some(&other_content)));

        let other_id = FileEntry::new(Uuid::new_v4(), "abc".to_string());
        assert!(!entry.is_named_for(&keys, Some(&other_id)));
        assert!(!entry.is_named_for(&keys, None));
    }
}
