//! Sealed copies of the master key.
//!
//! A [`KeyWrapper`] is one stored copy of a vault's master key, sealed
//! under a key derived from a passphrase or recovery phrase. The wrapper
//! owns its entire lifecycle — it generates its salt, records the KDF
//! parameters it was sealed with, and carries the versioned AEAD blob —
//! so callers hand it a secret and a cipher and nothing else. The vault
//! stores two of these, and opening either must yield the identical key.

use {base64::Engine, zeroize::Zeroizing};

use crate::{cipher::Cipher, error::VaultError, kdf::KdfParams};

/// AAD binding wrapper blobs to key wrapping, so a secrets blob can never
/// be replayed as a wrapped key or vice versa.
const WRAP_AAD: &[u8] = b"key-wrap";

const SALT_LEN: usize = 16;
const MASTER_KEY_LEN: usize = 32;

/// One sealed master-key copy, exactly as persisted: its own KDF salt and
/// parameters plus the base64 blob `[version || nonce || ciphertext || tag]`.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyWrapper {
    pub kdf_salt: String,
    pub kdf_params: KdfParams,
    pub blob: String,
}

impl KeyWrapper {
    /// Seal `master_key` under a key derived from `secret_input`, with a
    /// fresh random salt. Sealing the same key twice never produces the
    /// same wrapper.
    pub fn seal<C: Cipher>(
        cipher: &C,
        params: &KdfParams,
        secret_input: &[u8],
        master_key: &[u8; 32],
    ) -> Result<Self, VaultError> {
        let mut salt = [0u8; SALT_LEN];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut salt);
        let wrapping_key = params.derive(secret_input, &salt)?;

        let sealed = cipher.encrypt(&wrapping_key, master_key, WRAP_AAD)?;
        let mut blob = Vec::with_capacity(1 + sealed.len());
        blob.push(cipher.version_tag());
        blob.extend_from_slice(&sealed);

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(Self {
            kdf_salt: b64.encode(salt),
            kdf_params: params.clone(),
            blob: b64.encode(blob),
        })
    }

    /// Recover the master key.
    ///
    /// Authentication failures collapse to [`VaultError::InvalidPassphrase`]
    /// so a caller cannot tell a wrong credential from a tampered blob. A
    /// wrapper that is structurally unreadable — undecodable fields, an
    /// unknown cipher version, a key of the wrong width — is
    /// [`VaultError::Corrupted`] instead: no credential could ever open it.
    pub fn open<C: Cipher>(
        &self,
        cipher: &C,
        secret_input: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let salt = b64.decode(&self.kdf_salt).map_err(|_| VaultError::Corrupted)?;
        let blob = b64.decode(&self.blob).map_err(|_| VaultError::Corrupted)?;

        let Some((&version, sealed)) = blob.split_first() else {
            return Err(VaultError::Corrupted);
        };
        if version != cipher.version_tag() {
            return Err(VaultError::Corrupted);
        }

        let wrapping_key = self.kdf_params.derive(secret_input, &salt)?;
        let opened = Zeroizing::new(
            cipher
                .decrypt(&wrapping_key, sealed, WRAP_AAD)
                .map_err(|_| VaultError::InvalidPassphrase)?,
        );

        let key: [u8; MASTER_KEY_LEN] = opened
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::Corrupted)?;
        Ok(Zeroizing::new(key))
    }
}
