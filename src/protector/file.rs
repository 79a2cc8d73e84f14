//! File-backed protector: one ciphertext file per configuration.

use super::{ProtectedPassphrase, ProtectorKind, SecretProtector};
use crate::config::APPLICATION_NAME;
use crate::error::{Error, Result};
use directories::ProjectDirs;
use secrecy::SecretString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Keeps wrapped passphrases under a per-user directory.
#[derive(Debug, Clone)]
pub struct FileProtector {
    directory: PathBuf,
}

impl FileProtector {
    /// Create a protector storing ciphertexts in `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Per-user data directory for wrapped passphrases.
    pub fn default_directory() -> Result<PathBuf> {
        ProjectDirs::from("", "", APPLICATION_NAME)
            .map(|dirs| dirs.data_local_dir().join("secrets"))
            .ok_or_else(|| Error::Protector("no home directory for secret storage".to_string()))
    }

    /// Directory holding the ciphertexts.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, protected: &ProtectedPassphrase) -> PathBuf {
        self.directory.join(protected.storage_name())
    }
}

impl SecretProtector for FileProtector {
    fn kind(&self) -> ProtectorKind {
        ProtectorKind::File
    }

    fn protect(&self, passphrase: &SecretString) -> Result<ProtectedPassphrase> {
        let protected = ProtectedPassphrase::generate();
        let sealed = protected.seal(passphrase)?;

        std::fs::create_dir_all(&self.directory)?;
        let path = self.path_for(&protected);
        std::fs::write(&path, sealed)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(identifier = %protected.identifier, "stored wrapped passphrase");
        Ok(protected)
    }

    fn unprotect(&self, protected: &ProtectedPassphrase) -> Result<SecretString> {
        let path = self.path_for(protected);
        let sealed = std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::Protector(format!(
                "wrapped passphrase not found at {}",
                path.display()
            )),
            _ => Error::Io(e),
        })?;
        protected.open(&sealed)
    }

    fn forget(&self, protected: &ProtectedPassphrase) -> Result<()> {
        match std::fs::remove_file(self.path_for(protected)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
