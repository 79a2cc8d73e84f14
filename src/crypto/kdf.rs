//! Key derivation for passphrase-keyed and secret-keyed objects.
//!
//! Human passphrases go through Argon2id. Generated high-entropy secrets
//! (object passphrases, protector secrets) go through HKDF-SHA256, which is
//! enough for uniformly random input and keeps per-object cost negligible.

use crate::config::{KdfParams, KEY_LENGTH, SALT_LENGTH};
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

/// HKDF context string.
const HKDF_INFO: &[u8] = b"coresync object key v1";

/// How a key is stretched from a passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfMode {
    /// Argon2id, for user-chosen passphrases.
    Passphrase(KdfParams),
    /// HKDF-SHA256, for generated secrets.
    Secret,
}

/// Salted key derivation.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    salt: [u8; SALT_LENGTH],
    mode: KdfMode,
}

impl KeyDerivation {
    /// Create a new KDF with a random salt.
    pub fn new(mode: KdfMode) -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self { salt, mode }
    }

    /// Create a KDF from an existing salt (for decryption).
    pub fn from_salt(salt: [u8; SALT_LENGTH], mode: KdfMode) -> Self {
        Self { salt, mode }
    }

    /// Get the salt for storage.
    pub fn salt(&self) -> &[u8; SALT_LENGTH] {
        &self.salt
    }

    /// Derive a 256-bit key from a passphrase.
    pub fn derive_key(&self, passphrase: &str) -> Result<[u8; KEY_LENGTH]> {
        let mut key = [0u8; KEY_LENGTH];
        match self.mode {
            KdfMode::Passphrase(params) => {
                let params = Params::new(
                    params.mem_cost_kib,
                    params.time_cost,
                    params.parallelism,
                    Some(KEY_LENGTH),
                )
                .map_err(|e| Error::KeyDerivation(e.to_string()))?;

                Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                    .hash_password_into(passphrase.as_bytes(), &self.salt, &mut key)
                    .map_err(|e| Error::KeyDerivation(e.to_string()))?;
            }
            KdfMode::Secret => {
                Hkdf::<Sha256>::new(Some(&self.salt), passphrase.as_bytes())
                    .expand(HKDF_INFO, &mut key)
                    .map_err(|e| Error::KeyDerivation(e.to_string()))?;
            }
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_kdf;

    fn modes() -> [KdfMode; 2] {
        [KdfMode::Passphrase(test_kdf()), KdfMode::Secret]
    }

    #[test]
    fn test_key_derivation_deterministic() {
        for mode in modes() {
            let kdf = KeyDerivation::from_salt([1u8; 32], mode);
            assert_eq!(
                kdf.derive_key("password123").unwrap(),
                kdf.derive_key("password123").unwrap()
            );
        }
    }

    #[test]
    fn test_different_passwords_different_keys() {
        for mode in modes() {
            let kdf = KeyDerivation::from_salt([2u8; 32], mode);
            assert_ne!(
                kdf.derive_key("password1").unwrap(),
                kdf.derive_key("password2").unwrap()
            );
        }
    }

    #[test]
    fn test_different_salts_different_keys() {
        for mode in modes() {
            let key1 = KeyDerivation::from_salt([1u8; 32], mode)
                .derive_key("password")
                .unwrap();
            let key2 = KeyDerivation::from_salt([2u8; 32], mode)
                .derive_key("password")
                .unwrap();
            assert_ne!(key1, key2);
        }
    }

    #[test]
    fn test_modes_disagree() {
        let salt = [3u8; 32];
        let argon = KeyDerivation::from_salt(salt, KdfMode::Passphrase(test_kdf()));
        let hkdf = KeyDerivation::from_salt(salt, KdfMode::Secret);
        assert_ne!(
            argon.derive_key("password").unwrap(),
            hkdf.derive_key("password").unwrap()
        );
    }

    #[test]
    fn test_new_generates_random_salt() {
        let kdf1 = KeyDerivation::new(KdfMode::Secret);
        let kdf2 = KeyDerivation::new(KdfMode::Secret);
        assert_ne!(kdf1.salt(), kdf2.salt());
    }

    #[test]
    fn test_invalid_argon_params_rejected() {
        let params = KdfParams {
            mem_cost_kib: 0,
            time_cost: 0,
            parallelism: 0,
        };
        let kdf = KeyDerivation::from_salt([0u8; 32], KdfMode::Passphrase(params));
        assert!(matches!(
            kdf.derive_key("password"),
            Err(Error::KeyDerivation(_))
        ));
    }
}
