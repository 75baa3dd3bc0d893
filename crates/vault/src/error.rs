//! Vault error types.
//!
//! The message strings here are surfaced verbatim to callers; credential
//! failures are deliberately generic so unlock attempts cannot distinguish
//! a wrong passphrase from a tampered wrapper.

use gangway_store::StoreError;

/// Errors produced by vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// A vault already exists for this user.
    #[error("vault already initialized")]
    AlreadyInitialized,

    /// No vault exists for this user.
    #[error("vault is not initialized")]
    NotInitialized,

    /// Passphrase or recovery phrase did not unwrap the master key.
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    /// Unknown or idle-expired unlock token.
    #[error("vault session expired")]
    SessionExpired,

    /// Stored vault document could not be decoded.
    #[error("vault corrupted")]
    Corrupted,

    /// Encryption or decryption failed (tampered data, wrong key).
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Persistence error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
