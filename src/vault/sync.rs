//! Four-phase synchronization between the working tree and the vault.
//!
//! 1. Delete local plaintext whose head entry vanished from the vault.
//! 2. Decrypt head entries that are in the vault but not in the ledger.
//! 3. Encrypt eligible local entries that are not in the vault yet.
//! 4. Delete vault entries whose plaintext vanished locally, then purge
//!    content no head entry references.
//!
//! The ledger is committed after every phase. Failures on single entries are
//! logged and counted; only structural failures abort the run.

use crate::crypto;
use crate::error::Result;
use crate::storage::VaultLayout;
use crate::vault::context::VaultContext;
use crate::vault::file_store::FileStore;
use crate::vault::head_entry::{HeadEntry, TreeIndex};
use crate::vault::master::MasterVault;
use crate::vault::repository::Repository;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Counts of what one synchronization did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries written to the vault.
    pub encrypted: usize,
    /// Entries materialized locally.
    pub decrypted: usize,
    /// Local files and directories deleted.
    pub deleted_local: usize,
    /// Head entries deleted from the vault.
    pub deleted_vault: usize,
    /// File entries and blobs purged from the vault.
    pub purged: usize,
    /// Vault entries not materialized this run.
    pub skipped: usize,
    /// Entries that failed and will be retried.
    pub failures: usize,
}

impl SyncReport {
    /// True when nothing was added, restored or deleted on either side.
    pub fn is_unchanged(&self) -> bool {
        self.encrypted + self.decrypted + self.deleted_local + self.deleted_vault + self.purged == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} encrypted, {} decrypted, {} deleted locally, {} deleted from vault, {} purged",
            self.encrypted, self.decrypted, self.deleted_local, self.deleted_vault, self.purged
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        if self.failures > 0 {
            write!(f, ", {} failed", self.failures)?;
        }
        Ok(())
    }
}

/// An eligible entry of the working tree.
#[derive(Debug)]
struct ScanEntry {
    relative_path: String,
    full_path: PathBuf,
    is_file: bool,
}

/// Eligible entries of the working tree, directories before their children.
#[derive(Debug, Default)]
struct WorkingTree {
    entries: Vec<ScanEntry>,
    /// Directories that could not be read completely. An empty path stands
    /// for the whole tree.
    unreadable: Vec<String>,
}

impl WorkingTree {
    /// Whether the scan may have missed the entry.
    fn is_unreadable(&self, entry: &HeadEntry) -> bool {
        self.unreadable
            .iter()
            .any(|dir| dir.is_empty() || entry.is_within(dir))
    }
}

/// Runs one synchronization over a context and its ledger.
pub struct Synchronizer<'a> {
    ctx: &'a mut VaultContext,
    repository: &'a mut Repository,
    scope: Option<String>,
    report: SyncReport,
}

impl<'a> Synchronizer<'a> {
    pub fn new(ctx: &'a mut VaultContext, repository: &'a mut Repository) -> Self {
        Self {
            ctx,
            repository,
            scope: None,
            report: SyncReport::default(),
        }
    }

    /// Restrict every phase to one relative subdirectory.
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Run all phases.
    pub fn run(mut self) -> Result<SyncReport> {
        let had_entries = !self.repository.is_empty();
        let vault_heads = TreeIndex::list(self.ctx.layout())?;

        if !vault_heads.is_empty() {
            self.delete_source_stale(&vault_heads)?;
            self.repository.commit(self.ctx)?;

            self.decrypt_new(&vault_heads)?;
            self.repository.commit(self.ctx)?;
        }

        let tree = self.scan_working_tree();
        self.encrypt_new(&tree)?;
        self.repository.commit(self.ctx)?;

        if had_entries {
            self.delete_orphaned(&tree)?;
            self.repository.commit(self.ctx)?;
        }

        Ok(self.report)
    }

    fn in_scope(&self, entry: &HeadEntry) -> bool {
        match &self.scope {
            Some(scope) => entry.is_within(scope),
            None => true,
        }
    }

    /// Another ledger entry that is still in the vault claims the same path.
    fn path_claimed(&self, entry: &HeadEntry, vault_heads: &BTreeSet<String>) -> bool {
        self.repository
            .heads_at_path(entry.relative_path())
            .iter()
            .any(|other| {
                other.opaque_name() != entry.opaque_name()
                    && vault_heads.contains(other.opaque_name())
            })
    }

    /// Phase 1: remove plaintext for entries deleted from the vault.
    fn delete_source_stale(&mut self, vault_heads: &BTreeSet<String>) -> Result<()> {
        let stale: Vec<HeadEntry> = self
            .repository
            .head_entries()
            .into_iter()
            .filter(|e| self.in_scope(e) && !vault_heads.contains(e.opaque_name()))
            .collect();

        if stale.is_empty() {
            tracing::debug!("No source entries for deletion found.");
            return Ok(());
        }

        for entry in stale.iter().filter(|e| e.is_file()) {
            if self.path_claimed(entry, vault_heads) {
                self.repository.remove_head(entry.opaque_name());
                continue;
            }

            let full_path = self.ctx.full_path(entry.relative_path());
            match self.remove_stale_file(entry, &full_path) {
                Ok(removed) => {
                    self.repository.remove_head(entry.opaque_name());
                    if removed {
                        tracing::info!("Deleted entry \"{}\"", full_path.display());
                        self.report.deleted_local += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not delete \"{}\": {}", full_path.display(), e);
                    self.report.failures += 1;
                }
            }
        }

        // Deepest first so emptied parents can go too
        for entry in stale.iter().rev().filter(|e| e.is_directory()) {
            let full_path = self.ctx.full_path(entry.relative_path());
            if self.path_claimed(entry, vault_heads) || !full_path.is_dir() {
                self.repository.remove_head(entry.opaque_name());
                continue;
            }

            let is_empty = match full_path.read_dir() {
                Ok(mut children) => children.next().is_none(),
                Err(e) => {
                    tracing::warn!("Could not read \"{}\": {}", full_path.display(), e);
                    self.report.failures += 1;
                    continue;
                }
            };
            if !is_empty {
                tracing::warn!(
                    "Directory \"{}\" is not empty, keeping it",
                    full_path.display()
                );
                self.repository.remove_head(entry.opaque_name());
                continue;
            }

            match std::fs::remove_dir(&full_path) {
                Ok(()) => {
                    self.repository.remove_head(entry.opaque_name());
                    tracing::info!("Deleted entry \"{}\"", full_path.display());
                    self.report.deleted_local += 1;
                }
                Err(e) => {
                    tracing::warn!("Could not delete \"{}\": {}", full_path.display(), e);
                    self.report.failures += 1;
                }
            }
        }

        // Content a peer already purged; the rest waits for phase 4
        let layout = self.ctx.layout();
        for entry in self.repository.unreferenced_file_entries() {
            if !layout.file_object(&entry.id()).is_file() {
                self.repository.remove_file(&entry.id());
            }
        }
        Ok(())
    }

    /// Delete a stale file unless it changed locally since it was synchronized.
    ///
    /// Returns `true` if a file was removed.
    fn remove_stale_file(&self, entry: &HeadEntry, full_path: &Path) -> Result<bool> {
        if !full_path.is_file() {
            return Ok(false);
        }

        let known = entry
            .file_id()
            .and_then(|id| self.repository.file_entry(&id))
            .map(|f| f.checksum().to_string());
        if let Some(known) = known {
            if crypto::content_checksum(full_path)? != known {
                tracing::warn!(
                    "Keeping \"{}\": it changed locally after it was deleted from the vault",
                    full_path.display()
                );
                return Ok(false);
            }
        }

        match std::fs::remove_file(full_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Phase 2: materialize vault entries this participant has not seen.
    fn decrypt_new(&mut self, vault_heads: &BTreeSet<String>) -> Result<()> {
        let unknown: Vec<&String> = vault_heads
            .iter()
            .filter(|name| !self.repository.contains_head(name))
            .collect();

        if unknown.is_empty() {
            tracing::debug!("No new entries for decryption found.");
            return Ok(());
        }

        let keys = self.ctx.existing_master_vault()?.clone();
        let layout = self.ctx.layout().clone();
        let index = TreeIndex::new(&layout, &keys);
        let store = FileStore::new(&layout, &keys);

        let mut entries = Vec::with_capacity(unknown.len());
        for name in unknown {
            match index.read(name) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Skipping vault entry {}: {}", name, e);
                    self.report.skipped += 1;
                }
            }
        }
        entries.sort_by(|a, b| a.relative_path().cmp(b.relative_path()));

        // Files first, so a directory is only kept when it holds one
        let (files, directories): (Vec<HeadEntry>, Vec<HeadEntry>) = entries
            .into_iter()
            .filter(|e| self.in_scope(e))
            .partition(HeadEntry::is_file);

        for entry in files {
            if !self.ctx.filters().is_eligible_file(entry.relative_path()) {
                tracing::debug!("Skipping filtered entry \"{}\"", entry.relative_path());
                self.report.skipped += 1;
                continue;
            }
            let Some(id) = entry.file_id() else {
                continue;
            };

            let full_path = self.ctx.full_path(entry.relative_path());
            let file_entry = match store.resolve(self.repository, &id) {
                Ok(file_entry) if entry.is_named_for(&keys, Some(&file_entry)) => file_entry,
                Ok(_) => {
                    tracing::warn!(
                        "Invalid entry \"{}\": name does not match its content",
                        entry.relative_path()
                    );
                    self.report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Invalid entry \"{}\": {}", entry.relative_path(), e);
                    self.report.skipped += 1;
                    continue;
                }
            };
            if let Err(e) = store.decrypt_file_data(&file_entry, &full_path) {
                tracing::warn!("Could not decrypt \"{}\": {}", full_path.display(), e);
                self.report.failures += 1;
                continue;
            }

            tracing::info!("Decrypted entry \"{}\"", full_path.display());
            self.repository.insert_file(file_entry);
            self.repository.insert_head(entry);
            self.report.decrypted += 1;
        }

        for entry in directories {
            if !self.ctx.filters().is_eligible_directory(entry.relative_path())
                || !self.repository.has_file_below(entry.relative_path())
            {
                tracing::debug!(
                    "Skipping directory \"{}\" without eligible files",
                    entry.relative_path()
                );
                self.report.skipped += 1;
                continue;
            }

            let full_path = self.ctx.full_path(entry.relative_path());
            if let Err(e) = std::fs::create_dir_all(&full_path) {
                tracing::warn!("Could not create \"{}\": {}", full_path.display(), e);
                self.report.failures += 1;
                continue;
            }

            tracing::info!("Decrypted entry \"{}\"", full_path.display());
            self.repository.insert_head(entry);
            self.report.decrypted += 1;
        }
        Ok(())
    }

    /// Walk the working tree and keep eligible entries.
    ///
    /// Directories count only when an eligible file lies somewhere below them.
    fn scan_working_tree(&mut self) -> WorkingTree {
        let ctx = &*self.ctx;
        let (root, min_depth) = match &self.scope {
            Some(scope) => (ctx.full_path(scope), 0),
            None => (ctx.working_directory().to_path_buf(), 1),
        };
        if !root.is_dir() {
            return WorkingTree::default();
        }

        let mut candidates = Vec::new();
        let mut unreadable = Vec::new();
        let walker = WalkDir::new(&root)
            .min_depth(min_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !ctx.is_internal(e.path()));

        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!("Could not scan: {}", e);
                    self.report.failures += 1;
                    let relative_path = e.path().and_then(|path| ctx.relative_path(path));
                    unreadable.push(relative_path.unwrap_or_default());
                    continue;
                }
            };

            let file_type = item.file_type();
            if !file_type.is_file() && !file_type.is_dir() {
                tracing::debug!("Skipping special file \"{}\"", item.path().display());
                continue;
            }
            let Some(relative_path) = ctx.relative_path(item.path()) else {
                tracing::warn!("Skipping unrepresentable path \"{}\"", item.path().display());
                continue;
            };
            let eligible = if file_type.is_file() {
                ctx.filters().is_eligible_file(&relative_path)
            } else {
                ctx.filters().is_eligible_directory(&relative_path)
            };
            if !eligible {
                continue;
            }

            candidates.push(ScanEntry {
                relative_path,
                full_path: item.path().to_path_buf(),
                is_file: file_type.is_file(),
            });
        }

        let mut populated = HashSet::new();
        for file in candidates.iter().filter(|c| c.is_file) {
            let mut path = file.relative_path.as_str();
            while let Some(index) = path.rfind('/') {
                path = &path[..index];
                if !populated.insert(path.to_string()) {
                    break;
                }
            }
        }

        let entries: Vec<ScanEntry> = candidates
            .into_iter()
            .filter(|c| c.is_file || populated.contains(&c.relative_path))
            .collect();
        WorkingTree {
            entries,
            unreadable,
        }
    }

    /// Phase 3: put eligible local entries into the vault.
    fn encrypt_new(&mut self, tree: &WorkingTree) -> Result<()> {
        if tree.entries.is_empty() {
            tracing::debug!("No new entries for encryption found.");
            return Ok(());
        }

        let keys = self.ctx.master_vault()?.clone();
        let layout = self.ctx.layout().clone();
        let index = TreeIndex::new(&layout, &keys);
        let store = FileStore::new(&layout, &keys);

        for item in &tree.entries {
            let (head, file_entry) = if item.is_file {
                match store.get_or_create_file_entry(self.repository, &item.full_path) {
                    Ok(file_entry) => (
                        HeadEntry::file(&item.relative_path, &file_entry, &keys),
                        Some(file_entry),
                    ),
                    Err(e) => {
                        tracing::warn!("Could not read \"{}\": {}", item.full_path.display(), e);
                        self.report.failures += 1;
                        continue;
                    }
                }
            } else {
                (HeadEntry::directory(&item.relative_path, &keys), None)
            };

            let in_ledger = self.repository.contains_head(head.opaque_name());
            let in_vault = index.exists(head.opaque_name());
            let settled = match (in_ledger, in_vault) {
                (true, true) => true,
                (false, true) => self.adopt_existing(&index, &store, &keys, head.opaque_name()),
                (_, false) => false,
            };

            if !settled {
                if let Some(file_entry) = &file_entry {
                    if let Err(e) = store.store(file_entry, &item.full_path) {
                        tracing::warn!("Could not encrypt \"{}\": {}", item.full_path.display(), e);
                        self.report.failures += 1;
                        continue;
                    }
                }
                if let Err(e) = index.write(&head) {
                    tracing::warn!("Could not encrypt \"{}\": {}", item.full_path.display(), e);
                    self.report.failures += 1;
                    continue;
                }
                tracing::info!("Encrypted entry \"{}\"", item.full_path.display());
                self.repository.insert_head(head.clone());
                self.report.encrypted += 1;
            }

            self.delete_obsolete(&index, &head);
        }

        // Fresh entries that never reached the vault
        for entry in self.repository.unreferenced_file_entries() {
            if !store.entry_exists(&entry) {
                self.repository.remove_file(&entry.id());
            }
        }
        Ok(())
    }

    /// Register a head entry that is already in the vault but not in the ledger.
    ///
    /// Returns `false` when the object or its content cannot be resolved, in
    /// which case the caller rewrites it from local plaintext.
    fn adopt_existing(
        &mut self,
        index: &TreeIndex<'_>,
        store: &FileStore<'_>,
        keys: &MasterVault,
        name: &str,
    ) -> bool {
        let existing = match index.read(name) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!("Repairing vault entry {}: {}", name, e);
                return false;
            }
        };

        if let Some(id) = existing.file_id() {
            match store.resolve(self.repository, &id) {
                Ok(file_entry)
                    if store.blob_exists(file_entry.checksum())
                        && existing.is_named_for(keys, Some(&file_entry)) =>
                {
                    self.repository.insert_file(file_entry);
                }
                _ => {
                    tracing::warn!("Repairing vault entry \"{}\"", existing.relative_path());
                    return false;
                }
            }
        }

        tracing::debug!("Registered existing entry \"{}\"", existing.relative_path());
        self.repository.insert_head(existing);
        true
    }

    /// Remove ledger entries at the same path as `current` that name other content.
    fn delete_obsolete(&mut self, index: &TreeIndex<'_>, current: &HeadEntry) {
        let obsolete: Vec<HeadEntry> = self
            .repository
            .heads_at_path(current.relative_path())
            .into_iter()
            .filter(|e| e.opaque_name() != current.opaque_name())
            .collect();

        for entry in obsolete {
            match index.delete(&entry) {
                Ok(deleted) => {
                    self.repository.remove_head(entry.opaque_name());
                    if deleted {
                        tracing::info!("Deleted entry \"{}\"", entry.relative_path());
                        self.report.deleted_vault += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not delete \"{}\": {}", entry.relative_path(), e);
                    self.report.failures += 1;
                }
            }
        }
    }

    /// Whether the plaintext behind a ledger entry is gone from the working tree.
    ///
    /// A path now holding the other kind of entry counts as gone. Paths that
    /// cannot be inspected are kept.
    fn plaintext_gone(&self, entry: &HeadEntry) -> bool {
        let full_path = self.ctx.full_path(entry.relative_path());
        match std::fs::symlink_metadata(&full_path) {
            Ok(metadata) if entry.is_file() => !metadata.is_file(),
            Ok(metadata) => !metadata.is_dir(),
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("Could not inspect \"{}\": {}", full_path.display(), e);
                false
            }
        }
    }

    /// Phase 4: delete vault entries whose plaintext is gone, then purge content.
    ///
    /// Entries inside directories the scan could not read are left alone.
    fn delete_orphaned(&mut self, tree: &WorkingTree) -> Result<()> {
        let entries = self.repository.head_entries();
        let (removed, surviving): (Vec<HeadEntry>, Vec<HeadEntry>) =
            entries.into_iter().partition(|e| {
                self.in_scope(e) && !tree.is_unreadable(e) && self.plaintext_gone(e)
            });

        let needless: Vec<HeadEntry> = surviving
            .iter()
            .filter(|dir| dir.is_directory() && self.in_scope(dir) && !tree.is_unreadable(dir))
            .filter(|dir| {
                !surviving
                    .iter()
                    .any(|e| e.is_file() && e.is_below(dir.relative_path()))
            })
            .cloned()
            .collect();

        let doomed: Vec<HeadEntry> = removed.into_iter().chain(needless).collect();
        let unreferenced = self.repository.unreferenced_file_entries();
        if doomed.is_empty() && unreferenced.is_empty() {
            tracing::debug!("No orphaned entries found.");
            return Ok(());
        }

        let keys = self.ctx.master_vault()?.clone();
        let layout: VaultLayout = self.ctx.layout().clone();
        let index = TreeIndex::new(&layout, &keys);
        let store = FileStore::new(&layout, &keys);

        for entry in doomed {
            match index.delete(&entry) {
                Ok(deleted) => {
                    self.repository.remove_head(entry.opaque_name());
                    if deleted {
                        tracing::info!("Deleted entry \"{}\"", entry.relative_path());
                        self.report.deleted_vault += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not delete \"{}\": {}", entry.relative_path(), e);
                    self.report.failures += 1;
                }
            }
        }

        let (purged, failures) = store.purge_unreferenced(self.repository);
        self.report.purged += purged;
        self.report.failures += failures;
        Ok(())
    }
}
