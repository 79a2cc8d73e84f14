//! Out-of-band protection of the master passphrase.
//!
//! The configuration file never holds the plaintext passphrase. Instead it
//! holds a [`ProtectedPassphrase`]: an identifier, a random wrapping secret
//! and an entropy value. The passphrase itself is encrypted with a key derived
//! from the wrapping secret and entropy, and the ciphertext is kept somewhere
//! else: a per-user data directory or the platform keyring. Losing either half
//! makes the passphrase unrecoverable.

mod file;
mod keychain;

pub use self::file::FileProtector;
pub use self::keychain::KeyringProtector;

use crate::config::{SALT_LENGTH, WRAPPING_SECRET_LENGTH};
use crate::crypto::{self, KdfMode};
use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;
use zeroize::Zeroize;

/// Where the wrapped passphrase ciphertext lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectorKind {
    /// A file in the per-user data directory.
    #[default]
    File,
    /// The platform keyring.
    Keyring,
}

impl fmt::Display for ProtectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectorKind::File => write!(f, "file"),
            ProtectorKind::Keyring => write!(f, "keyring"),
        }
    }
}

/// Configuration-side half of a protected passphrase.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPassphrase {
    /// Names the out-of-band ciphertext.
    pub identifier: Uuid,
    /// Random secret the wrapping key is derived from.
    #[serde(rename = "passphrase")]
    pub wrapping_secret: String,
    /// Additional random input to the wrapping key.
    pub entropy: String,
}

impl fmt::Debug for ProtectedPassphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedPassphrase")
            .field("identifier", &self.identifier)
            .field("wrapping_secret", &"[REDACTED]")
            .field("entropy", &"[REDACTED]")
            .finish()
    }
}

impl ProtectedPassphrase {
    fn generate() -> Self {
        Self {
            identifier: Uuid::new_v4(),
            wrapping_secret: crypto::generate_secret(WRAPPING_SECRET_LENGTH),
            entropy: crypto::generate_secret(SALT_LENGTH),
        }
    }

    /// Name of the out-of-band ciphertext.
    pub fn storage_name(&self) -> String {
        self.identifier.simple().to_string()
    }

    fn key_material(&self) -> String {
        format!("{}:{}", self.wrapping_secret, self.entropy)
    }

    /// Encrypt a passphrase under this record's wrapping key.
    pub fn seal(&self, passphrase: &SecretString) -> Result<Vec<u8>> {
        let mut material = self.key_material();
        let sealed = crypto::encrypt_data(
            passphrase.expose_secret().as_bytes(),
            &material,
            KdfMode::Secret,
        );
        material.zeroize();
        sealed
    }

    /// Decrypt a passphrase sealed with [`ProtectedPassphrase::seal`].
    pub fn open(&self, ciphertext: &[u8]) -> Result<SecretString> {
        let mut material = self.key_material();
        let opened = crypto::decrypt_data(ciphertext, &material, KdfMode::Secret);
        material.zeroize();

        let plaintext = opened.map_err(|_| {
            Error::Protector(format!(
                "wrapped passphrase {} does not match this configuration",
                self.identifier
            ))
        })?;
        let passphrase = String::from_utf8(plaintext)
            .map_err(|_| Error::Protector("wrapped passphrase is not UTF-8".to_string()))?;
        Ok(SecretString::from(passphrase))
    }
}

/// A place to keep the wrapped passphrase outside the configuration file.
pub trait SecretProtector {
    /// Which kind of store this is.
    fn kind(&self) -> ProtectorKind;

    /// Wrap a passphrase under fresh secrets and store the ciphertext.
    fn protect(&self, passphrase: &SecretString) -> Result<ProtectedPassphrase>;

    /// Recover a passphrase wrapped by [`SecretProtector::protect`].
    fn unprotect(&self, protected: &ProtectedPassphrase) -> Result<SecretString>;

    /// Delete the stored ciphertext. Missing ciphertext is not an error.
    fn forget(&self, protected: &ProtectedPassphrase) -> Result<()>;
}

/// Build the protector for a configured kind.
pub fn protector_for(
    kind: ProtectorKind,
    secret_directory: Option<&Path>,
) -> Result<Box<dyn SecretProtector>> {
    match kind {
        ProtectorKind::File => {
            let directory = match secret_directory {
                Some(dir) => dir.to_path_buf(),
                None => FileProtector::default_directory()?,
            };
            Ok(Box::new(FileProtector::new(directory)))
        }
        ProtectorKind::Keyring => Ok(Box::new(KeyringProtector::new())),
    }
}
