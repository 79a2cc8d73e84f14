//! Vault operations - the main interface.

use crate::config::{Configuration, InitOptions, BASE_DIRECTORY_NAME};
use crate::error::{Error, Result};
use crate::vault::context::VaultContext;
use crate::vault::master::MasterVault;
use crate::vault::repository::Repository;
use crate::vault::sync::{SyncReport, Synchronizer};
use secrecy::SecretString;
use std::path::{Path, PathBuf};

/// An initialized working directory and its vault.
#[derive(Debug)]
pub struct Vault {
    ctx: VaultContext,
}

impl Vault {
    /// Normalize a working directory argument.
    ///
    /// A path naming the base directory itself resolves to its parent, and the
    /// result is canonical.
    pub fn resolve_working_directory(directory: &Path) -> Result<PathBuf> {
        let directory = if directory.file_name().and_then(|n| n.to_str()) == Some(BASE_DIRECTORY_NAME)
        {
            directory.parent().unwrap_or(directory)
        } else {
            directory
        };
        directory
            .canonicalize()
            .ok()
            .filter(|d| d.is_dir())
            .ok_or_else(|| Error::InvalidDirectory(directory.to_path_buf()))
    }

    /// Whether a working directory holds a configuration.
    pub fn is_initialized(working_directory: &Path) -> bool {
        Configuration::exists(&VaultContext::base_directory_of(working_directory))
    }

    /// Initialize a working directory.
    ///
    /// # Arguments
    ///
    /// * `working_directory` - Plaintext tree to synchronize
    /// * `passphrase` - Master passphrase protecting the vault
    /// * `options` - Vault location, protector and key derivation cost
    pub fn initialize(
        working_directory: &Path,
        passphrase: SecretString,
        options: InitOptions,
    ) -> Result<Self> {
        let working_directory = Self::resolve_working_directory(working_directory)?;
        let base = VaultContext::base_directory_of(&working_directory);
        if Configuration::exists(&base) {
            return Err(Error::AlreadyInitialized(working_directory));
        }

        let configuration = Configuration::create(&base, passphrase, &options)?;
        configuration.save()?;
        std::fs::create_dir_all(configuration.vault_directory())?;

        tracing::info!("Initialization completed successfully.");
        Ok(Self {
            ctx: VaultContext::new(&working_directory, configuration)?,
        })
    }

    /// Open an initialized working directory.
    pub fn open(working_directory: &Path) -> Result<Self> {
        let working_directory = Self::resolve_working_directory(working_directory)?;
        let base = VaultContext::base_directory_of(&working_directory);
        if !Configuration::exists(&base) {
            return Err(Error::NotInitialized(working_directory));
        }

        let configuration = Configuration::load(&base)?;
        let mut vault = Self {
            ctx: VaultContext::new(&working_directory, configuration)?,
        };
        if vault.ctx.configuration().has_pending_passphrase_change() {
            tracing::info!("Completing an interrupted passphrase change");
            vault.complete_passphrase_change()?;
        }
        Ok(vault)
    }

    pub fn context(&self) -> &VaultContext {
        &self.ctx
    }

    pub fn working_directory(&self) -> &Path {
        self.ctx.working_directory()
    }

    pub fn configuration(&self) -> &Configuration {
        self.ctx.configuration()
    }

    /// Load this working directory's ledger.
    pub fn repository(&self) -> Result<Repository> {
        Repository::load(&self.ctx)
    }

    /// Change the master passphrase.
    ///
    /// The configuration is saved with both wrapped passphrases first; the
    /// master vault and the ledger are then re-sealed under the new one and
    /// the old one is forgotten. An interrupted change is completed the next
    /// time the working directory is opened.
    pub fn set_passphrase(&mut self, passphrase: SecretString) -> Result<()> {
        self.complete_passphrase_change()?;

        self.ctx
            .configuration_mut()
            .begin_passphrase_change(passphrase)?;
        self.ctx.configuration().save()?;
        self.complete_passphrase_change()?;

        tracing::info!("Passphrase changed successfully.");
        Ok(())
    }

    /// Re-seal everything still keyed by the previous passphrase, then drop it.
    fn complete_passphrase_change(&mut self) -> Result<()> {
        if !self.ctx.configuration().has_pending_passphrase_change() {
            return Ok(());
        }

        let layout = self.ctx.layout().clone();
        let mode = self.ctx.kdf_mode();
        if MasterVault::exists(&layout) {
            match MasterVault::load(&layout, self.ctx.passphrase()?, mode) {
                Ok(_) => {}
                Err(Error::Decryption) => {
                    let previous = self
                        .ctx
                        .configuration()
                        .previous_passphrase()
                        .ok_or(Error::Decryption)?;
                    let master = MasterVault::load(&layout, previous, mode)?;
                    master.save(&layout, self.ctx.passphrase()?, mode)?;
                    tracing::debug!("Re-sealed master vault under the new passphrase");
                }
                Err(e) => return Err(e),
            }
        }
        self.ctx.forget_master_vault();

        let mut repository = Repository::load(&self.ctx)?;
        repository.commit(&mut self.ctx)?;

        let previous = self.ctx.configuration_mut().finish_passphrase_change();
        self.ctx.configuration().save()?;
        if let Some(previous) = previous {
            if let Err(e) = self.ctx.configuration().protector()?.forget(&previous) {
                tracing::warn!("Could not remove previous wrapped passphrase: {}", e);
            }
        }
        Ok(())
    }

    /// Point the working directory at another vault directory.
    ///
    /// The ledger describes the old vault, so it is discarded; the next
    /// synchronization merges the working tree with the new vault.
    pub fn set_vault_directory(&mut self, directory: &Path) -> Result<()> {
        self.ctx.configuration_mut().set_vault_directory(directory)?;
        self.ctx.configuration().save()?;
        self.ctx.reload()?;
        std::fs::create_dir_all(self.ctx.layout().root())?;

        match std::fs::remove_file(Repository::file_path(&self.ctx.base_directory())) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Vault directory set to {}", directory.display());
        Ok(())
    }

    /// Configured filter patterns.
    pub fn filters(&self) -> &[String] {
        self.ctx.configuration().filters()
    }

    /// Add filter patterns. Returns how many were new.
    ///
    /// Every pattern is validated before any is added.
    pub fn add_filters(&mut self, patterns: &[String]) -> Result<usize> {
        for pattern in patterns {
            crate::filter::FilterSet::validate(pattern)?;
        }

        let mut added = 0;
        for pattern in patterns {
            if self.ctx.configuration_mut().add_filter(pattern)? {
                added += 1;
            }
        }
        self.ctx.configuration().save()?;
        self.ctx.reload()?;
        Ok(added)
    }

    /// Remove filters by 1-based index; no indices removes all of them.
    pub fn remove_filters(&mut self, indices: &[usize]) -> Result<usize> {
        let removed = if indices.is_empty() {
            self.ctx.configuration_mut().clear_filters()
        } else {
            self.ctx.configuration_mut().remove_filters(indices)
        };
        self.ctx.configuration().save()?;
        self.ctx.reload()?;
        Ok(removed)
    }

    /// Synchronize the working tree with the vault.
    ///
    /// With a subdirectory, only entries at or below it are considered.
    pub fn synchronize(&mut self, subdirectory: Option<&Path>) -> Result<SyncReport> {
        let scope = match subdirectory {
            Some(dir) => self.scope_of(dir)?,
            None => None,
        };

        let mut repository = Repository::load(&self.ctx)?;
        let report = Synchronizer::new(&mut self.ctx, &mut repository)
            .with_scope(scope)
            .run()?;

        tracing::info!("Synchronization completed: {}", report);
        Ok(report)
    }

    fn scope_of(&self, directory: &Path) -> Result<Option<String>> {
        let full = if directory.is_absolute() {
            directory.to_path_buf()
        } else {
            self.ctx.working_directory().join(directory)
        };
        let full = full
            .canonicalize()
            .ok()
            .filter(|d| d.is_dir() && !self.ctx.is_internal(d))
            .ok_or_else(|| Error::InvalidDirectory(directory.to_path_buf()))?;

        if full == self.ctx.working_directory() {
            return Ok(None);
        }
        self.ctx
            .relative_path(&full)
            .map(Some)
            .ok_or_else(|| Error::InvalidDirectory(directory.to_path_buf()))
    }

    /// Remove all CoreSync state from a working directory.
    ///
    /// The wrapped passphrase is forgotten when the configuration is readable.
    /// Plaintext and external vault directories are left alone.
    pub fn detach(working_directory: &Path) -> Result<()> {
        let working_directory = Self::resolve_working_directory(working_directory)?;
        let base = VaultContext::base_directory_of(&working_directory);
        if !base.is_dir() {
            return Err(Error::NotInitialized(working_directory));
        }

        match Configuration::load(&base) {
            Ok(configuration) => {
                let forgotten = configuration
                    .protector()
                    .and_then(|p| p.forget(configuration.protected_passphrase()));
                if let Err(e) = forgotten {
                    tracing::warn!("Could not remove wrapped passphrase: {}", e);
                }
            }
            Err(e) => tracing::warn!("Configuration unreadable, removing anyway: {}", e),
        }

        std::fs::remove_dir_all(&base)?;
        tracing::info!("Detaching completed successfully.");
        Ok(())
    }

    /// Detach, then initialize again.
    pub fn reset(
        working_directory: &Path,
        passphrase: SecretString,
        options: InitOptions,
    ) -> Result<Self> {
        Self::detach(working_directory)?;
        Self::initialize(working_directory, passphrase, options)
    }
}
