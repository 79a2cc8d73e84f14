//! Encrypted objects on disk.
//!
//! Structured objects are JSON sealed with [`crypto::encrypt_data`]. Blobs are
//! streamed through in chunks:
//!
//! ```text
//! salt (32) || header nonce (12) || chunk 0 || chunk 1 || ...
//! chunk = nonce (12) || ciphertext || tag (16)
//! ```
//!
//! Every chunk but the last carries [`BLOB_CHUNK_SIZE`] plaintext bytes; the
//! last one is shorter, possibly empty. Each chunk authenticates its index,
//! the header nonce and whether it is the last one, so reordered, spliced or
//! truncated blobs fail to decrypt.
//!
//! Writes go to a sibling temporary file first and are renamed into place, so
//! a reader sees either the old object or the new one.

use crate::config::{BLOB_CHUNK_SIZE, SALT_LENGTH};
use crate::crypto::{self, Cipher, KdfMode, KeyDerivation, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// Suffix of in-flight object writes.
pub const TEMPORARY_SUFFIX: &str = ".part";

/// Sealed size of a full blob chunk.
const SEALED_CHUNK_SIZE: usize = NONCE_SIZE + BLOB_CHUNK_SIZE + TAG_SIZE;

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TEMPORARY_SUFFIX);
    path.with_file_name(name)
}

/// Stream into `path` through a temporary sibling, creating parent directories.
///
/// The temporary file is removed when `fill` fails, and the target is only
/// replaced once everything was written and flushed.
pub fn write_streaming<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temporary = temporary_path(path);
    let mut writer = BufWriter::new(File::create(&temporary)?);

    let written = fill(&mut writer)
        .and_then(|_| writer.flush().map_err(Error::from))
        .and_then(|_| std::fs::rename(&temporary, path).map_err(Error::from));
    if written.is_err() {
        let _ = std::fs::remove_file(&temporary);
    }
    written
}

/// Write bytes atomically, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_streaming(path, |writer| Ok(writer.write_all(bytes)?))
}

/// Serialize and encrypt a value to `path`.
pub fn write_object<T: Serialize>(
    path: &Path,
    value: &T,
    passphrase: &str,
    mode: KdfMode,
) -> Result<()> {
    let mut json = serde_json::to_vec(value)?;
    let sealed = crypto::encrypt_data(&json, passphrase, mode);
    json.zeroize();
    write_atomic(path, &sealed?)
}

/// Decrypt and deserialize a value from `path`.
pub fn read_object<T: DeserializeOwned>(path: &Path, passphrase: &str, mode: KdfMode) -> Result<T> {
    let sealed = std::fs::read(path)?;
    let mut json = crypto::decrypt_data(&sealed, passphrase, mode)?;
    let value = serde_json::from_slice(&json);
    json.zeroize();
    Ok(value?)
}

/// Fill `buffer` from `reader`, stopping early only at end of input.
fn read_full<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Associated data of one blob chunk.
fn chunk_aad(index: u64, header_nonce: &[u8; NONCE_SIZE], last: bool) -> [u8; 8 + NONCE_SIZE + 1] {
    let mut aad = [0u8; 8 + NONCE_SIZE + 1];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8..8 + NONCE_SIZE].copy_from_slice(header_nonce);
    aad[8 + NONCE_SIZE] = u8::from(last);
    aad
}

fn blob_cipher(salt: [u8; SALT_LENGTH], passphrase: &str, mode: KdfMode) -> Result<Cipher> {
    let mut key = KeyDerivation::from_salt(salt, mode).derive_key(passphrase)?;
    let cipher = Cipher::new(&key);
    key.zeroize();
    Ok(cipher)
}

/// Encrypt a plaintext file into a blob at `target`, one chunk at a time.
pub fn encrypt_file(source: &Path, target: &Path, passphrase: &str, mode: KdfMode) -> Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let salt = *KeyDerivation::new(mode).salt();
    let cipher = blob_cipher(salt, passphrase, mode)?;
    let header_nonce = crypto::generate_nonce();

    write_streaming(target, |writer| {
        writer.write_all(&salt)?;
        writer.write_all(&header_nonce)?;

        let mut buffer = vec![0u8; BLOB_CHUNK_SIZE];
        let mut index = 0u64;
        let sealed: Result<()> = loop {
            let length = match read_full(&mut reader, &mut buffer) {
                Ok(length) => length,
                Err(e) => break Err(e.into()),
            };
            let last = length < BLOB_CHUNK_SIZE;
            let aad = chunk_aad(index, &header_nonce, last);
            let chunk = cipher.encrypt_with_aad(&buffer[..length], &aad);
            if let Err(e) = chunk.and_then(|chunk| Ok(writer.write_all(&chunk)?)) {
                break Err(e);
            }
            if last {
                break Ok(());
            }
            index += 1;
        };
        buffer.zeroize();
        sealed
    })
}

/// Decrypt a blob into a plaintext file at `target`, creating parent directories.
///
/// The target is replaced atomically and never left half written. With an
/// `expected_checksum`, the plaintext must hash to it or nothing is written.
pub fn decrypt_file(
    source: &Path,
    target: &Path,
    passphrase: &str,
    mode: KdfMode,
    expected_checksum: Option<&str>,
) -> Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut salt = [0u8; SALT_LENGTH];
    let mut header_nonce = [0u8; NONCE_SIZE];
    if read_full(&mut reader, &mut salt)? < SALT_LENGTH
        || read_full(&mut reader, &mut header_nonce)? < NONCE_SIZE
    {
        return Err(Error::Decryption);
    }
    let cipher = blob_cipher(salt, passphrase, mode)?;

    write_streaming(target, |writer| {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; SEALED_CHUNK_SIZE];
        let mut index = 0u64;
        loop {
            let length = read_full(&mut reader, &mut buffer)?;
            if length < NONCE_SIZE + TAG_SIZE {
                // Missing last chunk
                return Err(Error::Decryption);
            }
            let last = length < SEALED_CHUNK_SIZE;
            let aad = chunk_aad(index, &header_nonce, last);
            let mut plaintext = cipher.decrypt_with_aad(&buffer[..length], &aad)?;
            hasher.update(&plaintext);
            let written = writer.write_all(&plaintext);
            plaintext.zeroize();
            written?;
            if last {
                break;
            }
            index += 1;
        }

        let actual = hex::encode(hasher.finalize());
        match expected_checksum {
            Some(expected) if expected != actual => Err(Error::InvalidEntry(format!(
                "blob decrypts to {} instead of {}",
                actual, expected
            ))),
            _ => Ok(()),
        }
    })
}
