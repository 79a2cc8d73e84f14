//! Per-run state shared by every vault component.

use crate::config::{Configuration, BASE_DIRECTORY_NAME};
use crate::crypto::KdfMode;
use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::storage::{fs, VaultLayout};
use crate::vault::master::MasterVault;
use std::path::{Path, PathBuf};

/// Working directory, configuration, vault layout, filters and the lazily
/// loaded master vault.
#[derive(Debug)]
pub struct VaultContext {
    working_directory: PathBuf,
    configuration: Configuration,
    layout: VaultLayout,
    filters: FilterSet,
    master_vault: Option<MasterVault>,
}

impl VaultContext {
    /// Build a context for a loaded configuration.
    pub fn new(working_directory: &Path, configuration: Configuration) -> Result<Self> {
        let layout = VaultLayout::new(configuration.vault_directory());
        let filters = FilterSet::new(configuration.filters())?;
        Ok(Self {
            working_directory: working_directory.to_path_buf(),
            configuration,
            layout,
            filters,
            master_vault: None,
        })
    }

    /// Base directory of a working directory.
    pub fn base_directory_of(working_directory: &Path) -> PathBuf {
        working_directory.join(BASE_DIRECTORY_NAME)
    }

    /// The plaintext tree being synchronized.
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Hidden local state directory.
    pub fn base_directory(&self) -> PathBuf {
        Self::base_directory_of(&self.working_directory)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Mutable configuration. Call [`VaultContext::reload`] after changing
    /// the vault directory or filters.
    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }

    /// Rebuild the layout and filters from the configuration.
    pub fn reload(&mut self) -> Result<()> {
        let layout = VaultLayout::new(self.configuration.vault_directory());
        if layout != self.layout {
            self.layout = layout;
            self.master_vault = None;
        }
        self.filters = FilterSet::new(self.configuration.filters())?;
        Ok(())
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// The user passphrase.
    pub fn passphrase(&self) -> Result<&str> {
        self.configuration.passphrase()
    }

    /// Key derivation for passphrase-keyed objects.
    pub fn kdf_mode(&self) -> KdfMode {
        KdfMode::Passphrase(self.configuration.kdf())
    }

    /// Master vault for encryption, created and persisted if absent.
    pub fn master_vault(&mut self) -> Result<&MasterVault> {
        if let Some(master) = &self.master_vault {
            if !MasterVault::exists(&self.layout) {
                master.save(&self.layout, self.passphrase()?, self.kdf_mode())?;
                tracing::debug!("Restored master vault in {}", self.layout.root().display());
            }
        }
        if self.master_vault.is_none() {
            let master = if MasterVault::exists(&self.layout) {
                MasterVault::load(&self.layout, self.passphrase()?, self.kdf_mode())?
            } else {
                let master = MasterVault::generate();
                master.save(&self.layout, self.passphrase()?, self.kdf_mode())?;
                tracing::debug!("Created master vault in {}", self.layout.root().display());
                master
            };
            self.master_vault = Some(master);
        }
        self.master_vault
            .as_ref()
            .ok_or_else(|| Error::MasterVaultUnavailable(self.layout.root().to_path_buf()))
    }

    /// Master vault for decryption; it must already exist.
    pub fn existing_master_vault(&mut self) -> Result<&MasterVault> {
        if self.master_vault.is_none() {
            let master = MasterVault::load(&self.layout, self.passphrase()?, self.kdf_mode())?;
            self.master_vault = Some(master);
        }
        self.master_vault
            .as_ref()
            .ok_or_else(|| Error::MasterVaultUnavailable(self.layout.root().to_path_buf()))
    }

    /// Drop the cached master vault, e.g. after it was deleted.
    pub fn forget_master_vault(&mut self) {
        self.master_vault = None;
    }

    /// Absolute path of a relative entry path.
    pub fn full_path(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .fold(self.working_directory.clone(), |path, part| path.join(part))
    }

    /// Relative entry path of a path inside the working directory.
    pub fn relative_path(&self, full_path: &Path) -> Option<String> {
        fs::relative_path_string(full_path, &self.working_directory)
    }

    /// Whether a path is CoreSync's own state and must never be synchronized.
    pub fn is_internal(&self, path: &Path) -> bool {
        path.starts_with(self.base_directory()) || path.starts_with(self.layout.root())
    }
}
