//! Configuration constants and the persisted per-directory configuration.

use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::protector::{self, ProtectedPassphrase, ProtectorKind, SecretProtector};
use crate::storage::object;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application name, used for the platform secret store and data directories.
pub const APPLICATION_NAME: &str = "coresync";

/// Hidden directory inside the working directory holding local state.
pub const BASE_DIRECTORY_NAME: &str = ".coresync";

/// Configuration file name inside the base directory.
pub const CONFIG_FILE_NAME: &str = "config";

/// Repository ledger file name inside the base directory.
pub const REPOSITORY_FILE_NAME: &str = "repository";

/// Log directory name inside the base directory.
pub const LOG_DIRECTORY_NAME: &str = "logs";

/// Default vault directory name inside the base directory.
pub const VAULT_DIRECTORY_NAME: &str = "vault";

/// Master vault object name inside the vault directory.
pub const MASTER_VAULT_FILE_NAME: &str = "csmaster";

/// Head entry objects directory inside the vault directory.
pub const HEAD_DIRECTORY_NAME: &str = "h";

/// File entry objects directory inside the vault directory.
pub const FILE_DIRECTORY_NAME: &str = "f";

/// Content blobs directory inside the vault directory.
pub const DATA_DIRECTORY_NAME: &str = "d";

/// Number of leading characters split off into a fan-out subdirectory.
pub const FANOUT_PREFIX_LENGTH: usize = 8;

/// Salt length in bytes for every encrypted object.
pub const SALT_LENGTH: usize = 32;

/// Symmetric key length in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Random bytes behind a generated object passphrase.
pub const GENERATED_PASSPHRASE_LENGTH: usize = 32;

/// Random bytes behind a protector wrapping secret.
pub const WRAPPING_SECRET_LENGTH: usize = 64;

/// Plaintext bytes sealed per content blob chunk.
pub const BLOB_CHUNK_SIZE: usize = 64 * 1024;

/// Filters installed by `init`: Windows shell files, databases, editor locks and backups.
pub const DEFAULT_FILTERS: &[&str] = &["**/desktop.ini", "**/*.db", "**/~*", "**/.~*"];

/// Argon2id defaults for passphrase-keyed objects.
pub mod argon2_params {
    /// Memory cost in KiB (19 MiB).
    pub const MEMORY_COST: u32 = 19456;

    /// Time cost (iterations).
    pub const TIME_COST: u32 = 2;

    /// Parallelism factor.
    pub const PARALLELISM: u32 = 1;
}

/// Argon2id cost parameters, persisted with the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_cost_kib: u32,
    /// Number of passes.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: argon2_params::MEMORY_COST,
            time_cost: argon2_params::TIME_COST,
            parallelism: argon2_params::PARALLELISM,
        }
    }
}

/// Options accepted by `init` and `reset`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// External vault directory (absolute). Defaults to `<base>/vault`.
    pub vault_directory: Option<PathBuf>,
    /// Where the wrapped passphrase is kept.
    pub protector: ProtectorKind,
    /// Override for the file protector's secret directory.
    pub secret_directory: Option<PathBuf>,
    /// Key derivation cost for passphrase-keyed objects.
    pub kdf: KdfParams,
}

/// Persisted configuration of one working directory.
///
/// The plaintext passphrase is never serialized; it is recovered through the
/// configured [`SecretProtector`] when the file is loaded.
#[derive(Debug, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(flatten)]
    protected: ProtectedPassphrase,
    #[serde(default)]
    protector: ProtectorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encrypted_directory: Option<PathBuf>,
    #[serde(default)]
    filters: Vec<String>,
    #[serde(default)]
    kdf: KdfParams,
    /// Wrapped passphrase of a change that has not finished re-sealing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<ProtectedPassphrase>,
    #[serde(skip)]
    passphrase: Option<SecretString>,
    #[serde(skip)]
    previous_passphrase: Option<SecretString>,
    #[serde(skip)]
    base_directory: PathBuf,
}

impl Configuration {
    /// Get the configuration file path for a base directory.
    pub fn file_path(base_directory: &Path) -> PathBuf {
        base_directory.join(CONFIG_FILE_NAME)
    }

    /// Check whether a configuration exists in a base directory.
    pub fn exists(base_directory: &Path) -> bool {
        Self::file_path(base_directory).is_file()
    }

    /// Create a configuration, wrapping the passphrase with the chosen protector.
    ///
    /// Nothing is written to the base directory; call [`Configuration::save`].
    pub fn create(
        base_directory: &Path,
        passphrase: SecretString,
        options: &InitOptions,
    ) -> Result<Self> {
        if passphrase.expose_secret().is_empty() {
            return Err(Error::InvalidPassphrase);
        }
        if let Some(dir) = &options.vault_directory {
            if !dir.is_absolute() {
                return Err(Error::InvalidDirectory(dir.clone()));
            }
        }

        let protector =
            protector::protector_for(options.protector, options.secret_directory.as_deref())?;
        let protected = protector.protect(&passphrase)?;

        Ok(Self {
            protected,
            protector: options.protector,
            secret_directory: options.secret_directory.clone(),
            encrypted_directory: options.vault_directory.clone(),
            filters: DEFAULT_FILTERS.iter().map(|f| f.to_string()).collect(),
            kdf: options.kdf,
            previous: None,
            passphrase: Some(passphrase),
            previous_passphrase: None,
            base_directory: base_directory.to_path_buf(),
        })
    }

    /// Load a configuration and recover its passphrase.
    pub fn load(base_directory: &Path) -> Result<Self> {
        let path = Self::file_path(base_directory);
        if !path.is_file() {
            return Err(Error::NotInitialized(base_directory.to_path_buf()));
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: Configuration = serde_json::from_str(&content)?;
        config.base_directory = base_directory.to_path_buf();

        let protector = config.protector()?;
        config.passphrase = Some(protector.unprotect(&config.protected)?);
        if let Some(previous) = &config.previous {
            match protector.unprotect(previous) {
                Ok(passphrase) => config.previous_passphrase = Some(passphrase),
                Err(e) => tracing::warn!("Could not recover previous passphrase: {}", e),
            }
        }
        Ok(config)
    }

    /// Save the configuration as indented JSON, replacing the file atomically.
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        object::write_atomic(&Self::file_path(&self.base_directory), content.as_bytes())
    }

    /// The protector this configuration was created with.
    pub fn protector(&self) -> Result<Box<dyn SecretProtector>> {
        protector::protector_for(self.protector, self.secret_directory.as_deref())
    }

    /// Which protector kind wraps the passphrase.
    pub fn protector_kind(&self) -> ProtectorKind {
        self.protector
    }

    /// The wrapped passphrase record.
    pub fn protected_passphrase(&self) -> &ProtectedPassphrase {
        &self.protected
    }

    /// The plaintext master passphrase.
    pub fn passphrase(&self) -> Result<&str> {
        self.passphrase
            .as_ref()
            .map(|p| p.expose_secret())
            .filter(|p| !p.is_empty())
            .ok_or(Error::InvalidPassphrase)
    }

    /// Replace the master passphrase and re-wrap it with a fresh protector secret.
    ///
    /// The previous wrapped record is kept, and saved along with the new one,
    /// until [`Configuration::finish_passphrase_change`]. Objects still sealed
    /// under the old passphrase stay readable in between.
    pub fn begin_passphrase_change(&mut self, passphrase: SecretString) -> Result<()> {
        if passphrase.expose_secret().is_empty()
            || self.passphrase.as_ref().map(|p| p.expose_secret())
                == Some(passphrase.expose_secret())
            || self.previous.is_some()
        {
            return Err(Error::InvalidPassphrase);
        }

        let protected = self.protector()?.protect(&passphrase)?;
        self.previous = Some(std::mem::replace(&mut self.protected, protected));
        self.previous_passphrase = self.passphrase.replace(passphrase);
        Ok(())
    }

    /// Whether a passphrase change still has to re-seal objects.
    pub fn has_pending_passphrase_change(&self) -> bool {
        self.previous.is_some()
    }

    /// The passphrase being replaced, while a change is pending.
    pub fn previous_passphrase(&self) -> Option<&str> {
        self.previous_passphrase.as_ref().map(|p| p.expose_secret())
    }

    /// End a passphrase change. Returns the previous wrapped record, which the
    /// caller forgets once this configuration is saved.
    pub fn finish_passphrase_change(&mut self) -> Option<ProtectedPassphrase> {
        self.previous_passphrase = None;
        self.previous.take()
    }

    /// Base directory holding this configuration.
    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    /// External vault directory, if one is configured.
    pub fn encrypted_directory(&self) -> Option<&Path> {
        self.encrypted_directory.as_deref()
    }

    /// Effective vault directory.
    pub fn vault_directory(&self) -> PathBuf {
        match &self.encrypted_directory {
            Some(dir) => dir.clone(),
            None => self.base_directory.join(VAULT_DIRECTORY_NAME),
        }
    }

    /// Point the configuration at another vault directory.
    ///
    /// The directory must be absolute and differ from the current one.
    pub fn set_vault_directory(&mut self, directory: &Path) -> Result<()> {
        if !directory.is_absolute() || self.encrypted_directory.as_deref() == Some(directory) {
            return Err(Error::InvalidDirectory(directory.to_path_buf()));
        }
        self.encrypted_directory = Some(directory.to_path_buf());
        Ok(())
    }

    /// Key derivation parameters for passphrase-keyed objects.
    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    /// Configured filter patterns, in order.
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Add a filter pattern. Returns `false` for duplicates.
    pub fn add_filter(&mut self, pattern: &str) -> Result<bool> {
        FilterSet::validate(pattern)?;
        if self.filters.iter().any(|f| f == pattern) {
            return Ok(false);
        }
        self.filters.push(pattern.to_string());
        Ok(true)
    }

    /// Remove filters by 1-based index. Out-of-range indices are ignored.
    pub fn remove_filters(&mut self, indices: &[usize]) -> usize {
        let doomed: Vec<String> = indices
            .iter()
            .filter_map(|&i| i.checked_sub(1).and_then(|i| self.filters.get(i)))
            .cloned()
            .collect();
        let before = self.filters.len();
        self.filters.retain(|f| !doomed.contains(f));
        before - self.filters.len()
    }

    /// Remove every filter.
    pub fn clear_filters(&mut self) -> usize {
        let count = self.filters.len();
        self.filters.clear();
        count
    }
}

/// Fast Argon2id parameters for tests.
#[cfg(test)]
pub(crate) fn test_kdf() -> KdfParams {
    KdfParams {
        mem_cost_kib: 8,
        time_cost: 1,
        parallelism: 1,
    }
}
