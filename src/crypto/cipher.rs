//! AES-256-GCM authenticated encryption of vault objects.
//!
//! Every object is laid out as `salt (32) || nonce (12) || ciphertext || tag (16)`.
//! Content blobs are sealed chunk by chunk; see [`crate::storage::object`].

use crate::config::{GENERATED_PASSPHRASE_LENGTH, KEY_LENGTH, SALT_LENGTH};
use crate::crypto::kdf::{KdfMode, KeyDerivation};
use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroize;

/// Nonce size for AES-GCM (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// Smallest well-formed object: salt, nonce and tag around an empty payload.
pub const MIN_OBJECT_SIZE: usize = SALT_LENGTH + NONCE_SIZE + TAG_SIZE;

/// AES-256-GCM cipher wrapper.
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Create a new cipher from a derived key.
    pub fn new(key: &[u8; KEY_LENGTH]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Encrypt data with a random nonce.
    ///
    /// Returns: nonce (12 bytes) || ciphertext || tag (16 bytes)
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_with_aad(plaintext, &[])
    }

    /// Encrypt data bound to associated data that is authenticated but not stored.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data that was encrypted with `encrypt`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with_aad(ciphertext, &[])
    }

    /// Decrypt data that was encrypted with `encrypt_with_aad` and the same `aad`.
    pub fn decrypt_with_aad(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Decryption);
        }

        let (nonce_bytes, ciphertext) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad })
            .map_err(|_| Error::Decryption)
    }
}

/// Fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt data under a passphrase with a fresh salt.
pub fn encrypt_data(plaintext: &[u8], passphrase: &str, mode: KdfMode) -> Result<Vec<u8>> {
    let kdf = KeyDerivation::new(mode);
    let mut key = kdf.derive_key(passphrase)?;
    let sealed = Cipher::new(&key).encrypt(plaintext);
    key.zeroize();

    let sealed = sealed?;
    let mut result = Vec::with_capacity(SALT_LENGTH + sealed.len());
    result.extend_from_slice(kdf.salt());
    result.extend_from_slice(&sealed);
    Ok(result)
}

/// Decrypt data produced by [`encrypt_data`].
///
/// Truncated input, a wrong passphrase and tampered bytes all yield
/// [`Error::Decryption`].
pub fn decrypt_data(data: &[u8], passphrase: &str, mode: KdfMode) -> Result<Vec<u8>> {
    if data.len() < MIN_OBJECT_SIZE {
        return Err(Error::Decryption);
    }

    let (salt, sealed) = data.split_at(SALT_LENGTH);
    let mut salt_bytes = [0u8; SALT_LENGTH];
    salt_bytes.copy_from_slice(salt);

    let mut key = KeyDerivation::from_salt(salt_bytes, mode).derive_key(passphrase)?;
    let opened = Cipher::new(&key).decrypt(sealed);
    key.zeroize();
    opened
}

/// Generate a random object passphrase (base64 of 32 random bytes).
pub fn generate_passphrase() -> String {
    generate_secret(GENERATED_PASSPHRASE_LENGTH)
}

/// Generate `length` random bytes, base64 encoded.
pub fn generate_secret(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = STANDARD.encode(&bytes);
    bytes.zeroize();
    encoded
}

/// Generate a random salt.
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
