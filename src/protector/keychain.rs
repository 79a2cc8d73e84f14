//! Platform keyring protector.
//!
//! Uses the `keyring` crate:
//! - macOS: Keychain Services
//! - Linux: Secret Service (D-Bus)
//! - Windows: Credential Manager

use super::{ProtectedPassphrase, ProtectorKind, SecretProtector};
use crate::config::APPLICATION_NAME;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::SecretString;

/// Keeps wrapped passphrases in the platform keyring, one entry per configuration.
#[derive(Debug, Clone, Default)]
pub struct KeyringProtector;

impl KeyringProtector {
    /// Create a keyring protector.
    pub fn new() -> Self {
        Self
    }

    fn entry(protected: &ProtectedPassphrase) -> Result<keyring::Entry> {
        keyring::Entry::new(APPLICATION_NAME, &protected.storage_name())
            .map_err(|e| Error::Protector(format!("keyring entry creation: {e}")))
    }
}

impl SecretProtector for KeyringProtector {
    fn kind(&self) -> ProtectorKind {
        ProtectorKind::Keyring
    }

    fn protect(&self, passphrase: &SecretString) -> Result<ProtectedPassphrase> {
        let protected = ProtectedPassphrase::generate();
        let sealed = protected.seal(passphrase)?;

        Self::entry(&protected)?
            .set_password(&STANDARD.encode(sealed))
            .map_err(|e| Error::Protector(format!("keyring store: {e}")))?;

        tracing::debug!(identifier = %protected.identifier, "stored wrapped passphrase in keyring");
        Ok(protected)
    }

    fn unprotect(&self, protected: &ProtectedPassphrase) -> Result<SecretString> {
        let encoded = match Self::entry(protected)?.get_password() {
            Ok(encoded) => encoded,
            Err(keyring::Error::NoEntry) => {
                return Err(Error::Protector(format!(
                    "no keyring entry for {}",
                    protected.identifier
                )))
            }
            Err(e) => return Err(Error::Protector(format!("keyring get: {e}"))),
        };
        protected.open(&STANDARD.decode(encoded)?)
    }

    fn forget(&self, protected: &ProtectedPassphrase) -> Result<()> {
        match Self::entry(protected)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Protector(format!("keyring delete: {e}"))),
        }
    }
}
