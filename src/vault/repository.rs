//! The local ledger of what this participant has synchronized.
//!
//! The repository is private to one working directory: it remembers which
//! head entries and file entries were materialized locally, which is how
//! deletions on either side are told apart from additions on the other.

use crate::config::REPOSITORY_FILE_NAME;
use crate::error::{Error, Result};
use crate::storage::{fs, object};
use crate::vault::context::VaultContext;
use crate::vault::file_store::FileEntry;
use crate::vault::head_entry::HeadEntry;
use crate::vault::master::MasterVault;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Serialize)]
struct LedgerRef<'a> {
    head_entries: Vec<&'a HeadEntry>,
    file_entries: Vec<&'a FileEntry>,
}

#[derive(Deserialize)]
struct Ledger {
    #[serde(default)]
    head_entries: Vec<HeadEntry>,
    #[serde(default)]
    file_entries: Vec<FileEntry>,
}

/// Head entries and file entries known to this participant.
#[derive(Debug, Default)]
pub struct Repository {
    head_entries: BTreeMap<String, HeadEntry>,
    file_entries: BTreeMap<Uuid, FileEntry>,
    dirty: bool,
}

impl Repository {
    /// Ledger file path for a base directory.
    pub fn file_path(base_directory: &Path) -> PathBuf {
        base_directory.join(REPOSITORY_FILE_NAME)
    }

    /// A repository with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the ledger for a context.
    ///
    /// A missing ledger is empty. While a passphrase change is pending, a
    /// ledger still sealed under the previous passphrase is read with it and
    /// marked for rewriting. An unreadable ledger is discarded with a warning
    /// and rebuilt from the vault on the next synchronization.
    pub fn load(ctx: &VaultContext) -> Result<Self> {
        let path = Self::file_path(&ctx.base_directory());
        if !path.is_file() {
            return Ok(Self::empty());
        }

        let mut read: Result<Ledger> =
            object::read_object(&path, ctx.passphrase()?, ctx.kdf_mode());
        let mut rekeyed = false;
        if matches!(read, Err(Error::Decryption)) {
            if let Some(previous) = ctx.configuration().previous_passphrase() {
                read = object::read_object(&path, previous, ctx.kdf_mode());
                rekeyed = read.is_ok();
            }
        }

        let ledger: Ledger = match read {
            Ok(ledger) => ledger,
            Err(e @ (Error::Decryption | Error::Serialization(_))) => {
                tracing::warn!("Discarding unreadable repository {}: {}", path.display(), e);
                return Ok(Self {
                    dirty: true,
                    ..Self::empty()
                });
            }
            Err(e) => return Err(e),
        };

        let mut repository = Self {
            dirty: rekeyed,
            ..Self::empty()
        };
        for entry in ledger.file_entries {
            repository.file_entries.insert(entry.id(), entry);
        }
        for entry in ledger.head_entries {
            repository
                .head_entries
                .insert(entry.opaque_name().to_string(), entry);
        }
        Ok(repository)
    }

    /// Whether no head entries are recorded.
    pub fn is_empty(&self) -> bool {
        self.head_entries.is_empty()
    }

    pub fn head_entry_count(&self) -> usize {
        self.head_entries.len()
    }

    pub fn file_entry_count(&self) -> usize {
        self.file_entries.len()
    }

    /// Whether there are changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force the next commit to rewrite the ledger.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Head entries sorted by relative path.
    pub fn head_entries(&self) -> Vec<HeadEntry> {
        let mut entries: Vec<HeadEntry> = self.head_entries.values().cloned().collect();
        entries.sort_by(|a, b| a.relative_path().cmp(b.relative_path()));
        entries
    }

    pub fn contains_head(&self, opaque_name: &str) -> bool {
        self.head_entries.contains_key(opaque_name)
    }

    pub fn head_entry(&self, opaque_name: &str) -> Option<&HeadEntry> {
        self.head_entries.get(opaque_name)
    }

    /// Head entries recorded at a relative path.
    pub fn heads_at_path(&self, relative_path: &str) -> Vec<HeadEntry> {
        self.head_entries
            .values()
            .filter(|e| e.relative_path() == relative_path)
            .cloned()
            .collect()
    }

    /// Whether a file head entry lies somewhere below `directory`.
    pub fn has_file_below(&self, directory: &str) -> bool {
        self.head_entries
            .values()
            .any(|e| e.is_file() && e.is_below(directory))
    }

    pub fn insert_head(&mut self, entry: HeadEntry) {
        self.head_entries
            .insert(entry.opaque_name().to_string(), entry);
        self.dirty = true;
    }

    pub fn remove_head(&mut self, opaque_name: &str) -> Option<HeadEntry> {
        let removed = self.head_entries.remove(opaque_name);
        self.dirty |= removed.is_some();
        removed
    }

    pub fn file_entry(&self, id: &Uuid) -> Option<&FileEntry> {
        self.file_entries.get(id)
    }

    pub fn file_entry_by_checksum(&self, checksum: &str) -> Option<&FileEntry> {
        self.file_entries.values().find(|e| e.checksum() == checksum)
    }

    /// Record a file entry. Re-inserting a known id is a no-op.
    pub fn insert_file(&mut self, entry: FileEntry) {
        if !self.file_entries.contains_key(&entry.id()) {
            self.file_entries.insert(entry.id(), entry);
            self.dirty = true;
        }
    }

    pub fn remove_file(&mut self, id: &Uuid) -> Option<FileEntry> {
        let removed = self.file_entries.remove(id);
        self.dirty |= removed.is_some();
        removed
    }

    fn referenced_ids(&self) -> HashSet<Uuid> {
        self.head_entries
            .values()
            .filter_map(HeadEntry::file_id)
            .collect()
    }

    /// File entries no head entry references.
    pub fn unreferenced_file_entries(&self) -> Vec<FileEntry> {
        let referenced = self.referenced_ids();
        self.file_entries
            .values()
            .filter(|e| !referenced.contains(&e.id()))
            .cloned()
            .collect()
    }

    /// Remove file head entries whose file entry is unknown.
    fn drop_invalid_heads(&mut self) {
        let invalid: Vec<String> = self
            .head_entries
            .values()
            .filter(|e| matches!(e.file_id(), Some(id) if !self.file_entries.contains_key(&id)))
            .map(|e| e.opaque_name().to_string())
            .collect();

        for name in invalid {
            if let Some(entry) = self.head_entries.remove(&name) {
                tracing::warn!("Dropping invalid entry \"{}\"", entry.relative_path());
                self.dirty = true;
            }
        }
    }

    /// Validate and persist the ledger.
    ///
    /// An empty ledger is removed instead of written. When the vault also
    /// holds no head or file entries, its master vault is removed too.
    pub fn commit(&mut self, ctx: &mut VaultContext) -> Result<()> {
        self.drop_invalid_heads();
        if !self.dirty {
            return Ok(());
        }

        let path = Self::file_path(&ctx.base_directory());
        if self.head_entries.is_empty() && self.file_entries.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            let layout = ctx.layout();
            if MasterVault::exists(layout)
                && !fs::has_fanout_objects(&layout.head_directory())?
                && !fs::has_fanout_objects(&layout.file_directory())?
            {
                MasterVault::delete(layout)?;
                ctx.forget_master_vault();
                tracing::debug!("Vault is empty, removed master vault");
            }
        } else {
            let mut heads: Vec<&HeadEntry> = self.head_entries.values().collect();
            heads.sort_by(|a, b| a.relative_path().cmp(b.relative_path()));
            let ledger = LedgerRef {
                head_entries: heads,
                file_entries: self.file_entries.values().collect(),
            };
            object::write_object(&path, &ledger, ctx.passphrase()?, ctx.kdf_mode())?;
        }

        self.dirty = false;
        Ok(())
    }
}
