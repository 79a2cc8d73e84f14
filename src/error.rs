//! Error types for CoreSync.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for CoreSync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in CoreSync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No configuration exists for the working directory.
    #[error("No configuration found in {0}; run 'init' first")]
    NotInitialized(PathBuf),

    /// A configuration already exists.
    #[error("Configuration already exists in {0}; use the 'config' command")]
    AlreadyInitialized(PathBuf),

    /// Directory argument is missing, relative or outside the working tree.
    #[error("Invalid directory: {0}")]
    InvalidDirectory(PathBuf),

    /// Empty passphrase, or the new passphrase equals the current one.
    #[error("Passphrase is empty or unchanged")]
    InvalidPassphrase,

    /// Encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Decryption error (wrong passphrase or corrupted object).
    #[error("Decryption failed: wrong passphrase or corrupted data")]
    Decryption,

    /// Key derivation error.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The wrapped passphrase could not be stored or recovered.
    #[error("Secret protector error: {0}")]
    Protector(String),

    /// A filter pattern failed to compile.
    #[error("Invalid filter pattern: {0}")]
    InvalidFilter(String),

    /// Vault objects exist but the master vault that protects them does not.
    #[error("Master vault missing or unreadable in {0}")]
    MasterVaultUnavailable(PathBuf),

    /// An entry violates its validity invariant.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid vault, bad directory, duplicate initialization.
    Configuration,
    /// Decryption or deserialization failure of an encrypted object.
    Crypto,
    /// Missing files, permission failures.
    Io,
    /// An entry failed its validity invariant.
    Validation,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::NotInitialized(_)
            | Error::AlreadyInitialized(_)
            | Error::InvalidDirectory(_)
            | Error::InvalidPassphrase
            | Error::InvalidFilter(_)
            | Error::Protector(_)
            | Error::MasterVaultUnavailable(_) => ErrorKind::Configuration,
            Error::Encryption(_)
            | Error::Decryption
            | Error::KeyDerivation(_)
            | Error::Serialization(_) => ErrorKind::Crypto,
            Error::InvalidEntry(_) => ErrorKind::Validation,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}
