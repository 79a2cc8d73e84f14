//! File entries and content-addressed blob storage.

use crate::crypto::{self, KdfMode};
use crate::error::{Error, Result};
use crate::storage::{fs, object, VaultLayout};
use crate::vault::master::MasterVault;
use crate::vault::repository::Repository;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Metadata of one distinct content: its checksum and the secret sealing its blob.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct FileEntry {
    #[zeroize(skip)]
    id: Uuid,
    checksum: String,
    passphrase: String,
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("id", &self.id)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

impl FileEntry {
    /// New entry for a content checksum with a fresh blob passphrase.
    pub fn new(id: Uuid, checksum: String) -> Self {
        Self {
            id,
            checksum,
            passphrase: crypto::generate_passphrase(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    fn data_passphrase(&self) -> &str {
        &self.passphrase
    }
}

/// File entry objects and content blobs in the vault.
pub struct FileStore<'a> {
    layout: &'a VaultLayout,
    keys: &'a MasterVault,
}

impl<'a> FileStore<'a> {
    pub fn new(layout: &'a VaultLayout, keys: &'a MasterVault) -> Self {
        Self { layout, keys }
    }

    /// File entry for a plaintext file's current content.
    ///
    /// Reuses the ledger's entry for the same checksum, then the vault's entry
    /// under the id derived from the checksum. Only when neither exists is a
    /// new entry created. The result is added to the ledger.
    pub fn get_or_create_file_entry(
        &self,
        repository: &mut Repository,
        path: &Path,
    ) -> Result<FileEntry> {
        let checksum = crypto::content_checksum(path)?;
        if let Some(existing) = repository.file_entry_by_checksum(&checksum) {
            return Ok(existing.clone());
        }

        let id = self.keys.file_entry_id(&checksum);
        let entry = match self.read_entry(&id) {
            Ok(existing) if existing.checksum() == checksum => {
                tracing::debug!("Adopting file entry {} from the vault", id);
                existing
            }
            Ok(_) | Err(Error::Decryption | Error::Serialization(_) | Error::InvalidEntry(_)) => {
                // Unusable object under our id; replace it
                fs::remove_file_and_empty_parents(
                    &self.layout.file_object(&id),
                    &self.layout.file_directory(),
                )?;
                FileEntry::new(id, checksum)
            }
            Err(e) => return Err(e),
        };
        repository.insert_file(entry.clone());
        Ok(entry)
    }

    /// Whether the entry's metadata object exists in the vault.
    pub fn entry_exists(&self, entry: &FileEntry) -> bool {
        self.layout.file_object(&entry.id()).is_file()
    }

    /// Whether a blob for the checksum exists in the vault.
    pub fn blob_exists(&self, checksum: &str) -> bool {
        self.layout.data_blob(checksum).is_file()
    }

    /// Put a file's content and metadata into the vault.
    ///
    /// Without a metadata object the blob is (re)written, since an existing
    /// blob may be left over from an entry that was lost. With metadata
    /// present the blob is written only if missing.
    pub fn store(&self, entry: &FileEntry, plaintext: &Path) -> Result<()> {
        if !self.entry_exists(entry) {
            self.write_blob(entry, plaintext)?;
            self.write_entry(entry)?;
        } else {
            self.encrypt_file_data(entry, plaintext)?;
        }
        Ok(())
    }

    /// Encrypt a file into its blob unless the blob already exists.
    ///
    /// Returns `true` if a blob was written.
    pub fn encrypt_file_data(&self, entry: &FileEntry, plaintext: &Path) -> Result<bool> {
        if self.blob_exists(entry.checksum()) {
            return Ok(false);
        }
        self.write_blob(entry, plaintext)?;
        Ok(true)
    }

    fn write_blob(&self, entry: &FileEntry, plaintext: &Path) -> Result<()> {
        object::encrypt_file(
            plaintext,
            &self.layout.data_blob(entry.checksum()),
            entry.data_passphrase(),
            KdfMode::Secret,
        )
    }

    /// Decrypt an entry's blob to `target`, overwriting it.
    ///
    /// Skips the write when `target` already holds the same content.
    pub fn decrypt_file_data(&self, entry: &FileEntry, target: &Path) -> Result<()> {
        if target.is_file() && crypto::content_checksum(target)? == entry.checksum() {
            return Ok(());
        }

        let blob = self.layout.data_blob(entry.checksum());
        if !blob.is_file() {
            return Err(Error::InvalidEntry(format!(
                "content {} is missing from the vault",
                entry.checksum()
            )));
        }
        object::decrypt_file(
            &blob,
            target,
            entry.data_passphrase(),
            KdfMode::Secret,
            Some(entry.checksum()),
        )
    }

    /// Encrypt a file entry's metadata into the vault.
    pub fn write_entry(&self, entry: &FileEntry) -> Result<()> {
        object::write_object(
            &self.layout.file_object(&entry.id()),
            entry,
            self.keys.file_entry_passphrase(),
            KdfMode::Secret,
        )
    }

    /// Decrypt a file entry's metadata from the vault.
    pub fn read_entry(&self, id: &Uuid) -> Result<FileEntry> {
        let path = self.layout.file_object(id);
        if !path.is_file() {
            return Err(Error::InvalidEntry(format!("file entry {id} not found")));
        }
        let entry: FileEntry =
            object::read_object(&path, self.keys.file_entry_passphrase(), KdfMode::Secret)?;
        if entry.id() != *id {
            return Err(Error::InvalidEntry(format!(
                "file entry {id} claims id {}",
                entry.id()
            )));
        }
        Ok(entry)
    }

    /// File entry by id, from the ledger or else from the vault.
    pub fn resolve(&self, repository: &Repository, id: &Uuid) -> Result<FileEntry> {
        match repository.file_entry(id) {
            Some(entry) => Ok(entry.clone()),
            None => self.read_entry(id),
        }
    }

    /// Delete an entry's metadata object and blob.
    pub fn delete(&self, entry: &FileEntry) -> Result<()> {
        fs::remove_file_and_empty_parents(
            &self.layout.file_object(&entry.id()),
            &self.layout.file_directory(),
        )?;
        fs::remove_file_and_empty_parents(
            &self.layout.data_blob(entry.checksum()),
            &self.layout.data_directory(),
        )?;
        Ok(())
    }

    /// Delete every file entry no head entry references, from vault and ledger.
    ///
    /// Failures are logged and leave the entry in the ledger for the next run.
    /// Returns the number of entries purged and the number of failures.
    pub fn purge_unreferenced(&self, repository: &mut Repository) -> (usize, usize) {
        let mut purged = 0;
        let mut failures = 0;

        for entry in repository.unreferenced_file_entries() {
            match self.delete(&entry) {
                Ok(()) => {
                    repository.remove_file(&entry.id());
                    tracing::info!("Deleted file with checksum {}", entry.checksum());
                    purged += 1;
                }
                Err(e) => {
                    tracing::warn!("Could not delete file {}: {}", entry.checksum(), e);
                    failures += 1;
                }
            }
        }
        (purged, failures)
    }
}
