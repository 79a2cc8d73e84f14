//! The master vault: secrets shared by every participant of a vault.

use crate::config::SALT_LENGTH;
use crate::crypto::{self, KdfMode};
use crate::error::{Error, Result};
use crate::storage::{object, VaultLayout};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Keys protecting head entries and file entries.
///
/// Stored as `csmaster`, encrypted under the user passphrase. Created on the
/// first encryption into an empty vault and deleted once the vault is empty.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct MasterVault {
    head_entry_passphrase: String,
    #[serde(with = "salt_base64")]
    head_entry_salt: [u8; SALT_LENGTH],
    file_entry_passphrase: String,
}

impl fmt::Debug for MasterVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterVault").finish_non_exhaustive()
    }
}

impl MasterVault {
    /// Generate fresh random secrets.
    pub fn generate() -> Self {
        Self {
            head_entry_passphrase: crypto::generate_passphrase(),
            head_entry_salt: crypto::generate_salt(),
            file_entry_passphrase: crypto::generate_passphrase(),
        }
    }

    /// Whether the vault holds a master vault object.
    pub fn exists(layout: &VaultLayout) -> bool {
        layout.master_vault().is_file()
    }

    /// Decrypt the master vault.
    pub fn load(layout: &VaultLayout, passphrase: &str, mode: KdfMode) -> Result<Self> {
        let path = layout.master_vault();
        if !path.is_file() {
            return Err(Error::MasterVaultUnavailable(layout.root().to_path_buf()));
        }
        object::read_object(&path, passphrase, mode)
    }

    /// Encrypt the master vault under `passphrase`.
    pub fn save(&self, layout: &VaultLayout, passphrase: &str, mode: KdfMode) -> Result<()> {
        object::write_object(&layout.master_vault(), self, passphrase, mode)
    }

    /// Delete the master vault object.
    pub fn delete(layout: &VaultLayout) -> Result<bool> {
        match std::fs::remove_file(layout.master_vault()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Passphrase for head entry objects.
    pub fn head_entry_passphrase(&self) -> &str {
        &self.head_entry_passphrase
    }

    /// Passphrase for file entry objects.
    pub fn file_entry_passphrase(&self) -> &str {
        &self.file_entry_passphrase
    }

    /// Opaque name of a head entry. Directories have no checksum.
    pub fn opaque_name(&self, relative_path: &str, checksum: Option<&str>) -> String {
        crypto::opaque_name(&self.head_entry_salt, relative_path, checksum)
    }

    /// Id of the file entry holding the content with `checksum`.
    pub fn file_entry_id(&self, checksum: &str) -> Uuid {
        crypto::file_entry_id(&self.head_entry_salt, checksum)
    }
}

mod salt_base64 {
    use super::*;
    use std::result::Result;

    pub fn serialize<S: Serializer>(salt: &[u8; SALT_LENGTH], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(salt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; SALT_LENGTH], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD.decode(encoded).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("head entry salt has wrong length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_kdf;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        let mode = KdfMode::Passphrase(test_kdf());

        let master = MasterVault::generate();
        master.save(&layout, "pw", mode).unwrap();
        assert!(MasterVault::exists(&layout));

        let loaded = MasterVault::load(&layout, "pw", mode).unwrap();
        assert_eq!(loaded.head_entry_passphrase(), master.head_entry_passphrase());
        assert_eq!(
            loaded.opaque_name("a.txt", Some("00")),
            master.opaque_name("a.txt", Some("00"))
        );
    }

    #[test]
    fn test_load_missing_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());

        let result = MasterVault::load(&layout, "pw", KdfMode::Secret);
        assert!(matches!(result, Err(Error::MasterVaultUnavailable(_))));
    }

    #[test]
    fn test_wrong_passphrase() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        let mode = KdfMode::Passphrase(test_kdf());
        MasterVault::generate().save(&layout, "pw", mode).unwrap();

        assert!(matches!(
            MasterVault::load(&layout, "nope", mode),
            Err(Error::Decryption)
        ));
    }

    #[test]
    fn test_generated_vaults_differ() {
        let a = MasterVault::generate();
        let b = MasterVault::generate();
        assert_ne!(a.opaque_name("x", None), b.opaque_name("x", None));
        assert_ne!(a.file_entry_passphrase(), b.file_entry_passphrase());
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        MasterVault::generate()
            .save(&layout, "pw", KdfMode::Secret)
            .unwrap();

        assert!(MasterVault::delete(&layout).unwrap());
        assert!(!MasterVault::delete(&layout).unwrap());
    }
}
