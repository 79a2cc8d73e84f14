//! Cryptographic operations for CoreSync.
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption
//! - Argon2id and HKDF-SHA256 key derivation
//! - SHA-256 content checksums and keyed BLAKE3 object names

mod cipher;
mod hash;
mod kdf;

pub use cipher::{
    decrypt_data, encrypt_data, generate_nonce, generate_passphrase, generate_salt,
    generate_secret, Cipher, MIN_OBJECT_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use hash::{checksum_reader, content_checksum, file_entry_id, opaque_name};
pub use kdf::{KdfMode, KeyDerivation};
