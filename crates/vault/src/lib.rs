//! Per-user encrypted secret vault.
//!
//! A random 256-bit master key encrypts each user's secret bundle with
//! ChaCha20-Poly1305. The master key itself is stored only as two
//! independently wrapped copies: one under an Argon2id-derived key from the
//! user's passphrase, one under a key derived from a recovery mnemonic.
//! Unlocking either wrapper yields the identical master key and an opaque
//! sliding-TTL token; plaintext secrets surface only inside the
//! [`Vault::with_secrets`] callback scope.

pub mod chacha20;
pub mod cipher;
pub mod error;
pub mod kdf;
pub mod mnemonic;
pub mod token;
pub mod vault;
pub mod wrapper;

pub use {
    chacha20::ChaCha20Poly1305Cipher,
    cipher::Cipher,
    error::VaultError,
    kdf::KdfParams,
    token::TokenTable,
    vault::{RecoverOutcome, SecretEntry, SecretMap, SecretsHandle, UnlockOutcome, Vault,
        VaultStatus},
    wrapper::KeyWrapper,
};
