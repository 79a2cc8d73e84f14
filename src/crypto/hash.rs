//! Content checksums and opaque vault names.

use crate::config::SALT_LENGTH;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use uuid::Uuid;

/// BLAKE3 derivation context for file entry ids.
const FILE_ENTRY_ID_CONTEXT: &str = "coresync 2024 file entry id v1";

/// SHA-256 of everything a reader yields, as lowercase hex.
pub fn checksum_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Streaming SHA-256 of a file's contents.
pub fn content_checksum(path: &Path) -> Result<String> {
    checksum_reader(BufReader::new(File::open(path)?))
}

/// Keyed BLAKE3 hash naming a head entry object.
///
/// The name depends only on the key, the relative path and the content
/// checksum, so every participant sharing a vault computes the same name for
/// the same entry.
pub fn opaque_name(key: &[u8; SALT_LENGTH], relative_path: &str, checksum: Option<&str>) -> String {
    let mut hasher = blake3::Hasher::new_keyed(key);
    hasher.update(relative_path.as_bytes());
    hasher.update(&[0]);
    if let Some(checksum) = checksum {
        hasher.update(checksum.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// File entry id for a content checksum.
///
/// Keyed like [`opaque_name`] but under a separately derived key, so every
/// participant mints the same id for the same content and ids reveal nothing
/// about head entry names.
pub fn file_entry_id(key: &[u8; SALT_LENGTH], checksum: &str) -> Uuid {
    let id_key = blake3::derive_key(FILE_ENTRY_ID_CONTEXT, key);
    let hash = blake3::keyed_hash(&id_key, checksum.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[..16]);
    uuid::Builder::from_custom_bytes(bytes).into_uuid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checksum_known_value() {
        let checksum = checksum_reader(&b"abc"[..]).unwrap();
        assert_eq!(
            checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_checksum_matches_reader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"Hello, World!").unwrap();

        assert_eq!(
            content_checksum(&path).unwrap(),
            checksum_reader(&b"Hello, World!"[..]).unwrap()
        );
    }

    #[test]
    fn test_opaque_name_is_deterministic_and_keyed() {
        let key = [7u8; 32];
        let a = opaque_name(&key, "docs/a.txt", Some("abc"));
        assert_eq!(a, opaque_name(&key, "docs/a.txt", Some("abc")));
        assert_eq!(a.len(), 64);

        assert_ne!(a, opaque_name(&[8u8; 32], "docs/a.txt", Some("abc")));
        assert_ne!(a, opaque_name(&key, "docs/a.txt", Some("abd")));
        assert_ne!(a, opaque_name(&key, "docs/b.txt", Some("abc")));
        assert_ne!(a, opaque_name(&key, "docs/a.txt", None));
    }

    #[test]
    fn test_path_checksum_boundary_is_unambiguous() {
        let key = [1u8; 32];
        assert_ne!(
            opaque_name(&key, "ab", Some("c")),
            opaque_name(&key, "a", Some("bc"))
        );
    }

    #[test]
    fn test_file_entry_id_is_deterministic_and_keyed() {
        let key = [7u8; 32];
        let id = file_entry_id(&key, "abc");
        assert_eq!(id, file_entry_id(&key, "abc"));
        assert_ne!(id, file_entry_id(&key, "abd"));
        assert_ne!(id, file_entry_id(&[8u8; 32], "abc"));
        assert_eq!(id.get_variant(), uuid::Variant::RFC4122);
    }
}
