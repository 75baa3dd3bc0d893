//! Vault state machine: init, unlock, recovery, and scoped secret access.

use std::{collections::HashMap, sync::Arc};

use {base64::Engine, zeroize::Zeroizing};

use gangway_store::{Store, keys};

use crate::{
    chacha20::ChaCha20Poly1305Cipher,
    cipher::Cipher,
    error::VaultError,
    kdf::KdfParams,
    mnemonic,
    token::TokenTable,
    wrapper::KeyWrapper,
};

/// Stored vault document version.
const VAULT_VERSION: u32 = 1;

/// AAD for the secrets blob, distinct from key wrapping.
const SECRETS_AAD: &[u8] = b"secrets";

// ── Stored form ─────────────────────────────────────────────────────────────

/// The persisted vault. Never contains plaintext secrets, the passphrase,
/// or the master key.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVault {
    pub version: u32,
    pub passphrase_wrapper: KeyWrapper,
    pub recovery_wrapper: KeyWrapper,
    /// base64 of `[version || nonce || ciphertext || tag]` under the master key.
    pub encrypted_secrets: String,
    pub created_at: u64,
    pub updated_at: u64,
}

/// One stored credential set, addressed by secret id.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

pub type SecretMap = HashMap<String, SecretEntry>;

// ── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    pub initialized: bool,
    pub unlocked: bool,
}

#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockOutcome {
    pub token: String,
    pub ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RecoverOutcome {
    pub token: String,
    pub ttl_secs: u64,
    /// The next recovery phrase. Shown to the user exactly once.
    pub recovery_phrase: String,
}

// ── Secrets handle ──────────────────────────────────────────────────────────

/// Mutable view over the decrypted secret map handed to
/// [`Vault::with_secrets`] callbacks. Mutation is tracked so the blob is
/// re-encrypted and written back only when something changed.
pub struct SecretsHandle {
    map: SecretMap,
    dirty: bool,
}

impl SecretsHandle {
    #[must_use]
    pub fn get(&self, secret_id: &str) -> Option<&SecretEntry> {
        self.map.get(secret_id)
    }

    #[must_use]
    pub fn secrets(&self) -> &SecretMap {
        &self.map
    }

    /// Mutable access; marks the handle dirty.
    pub fn secrets_mut(&mut self) -> &mut SecretMap {
        self.dirty = true;
        &mut self.map
    }

    pub fn insert(&mut self, secret_id: impl Into<String>, entry: SecretEntry) {
        self.dirty = true;
        self.map.insert(secret_id.into(), entry);
    }

    pub fn remove(&mut self, secret_id: &str) -> Option<SecretEntry> {
        self.dirty = true;
        self.map.remove(secret_id)
    }
}

// ── Vault service ───────────────────────────────────────────────────────────

/// Per-user encrypted vault over an abstract [`Store`].
///
/// Generic over [`Cipher`] but defaults to [`ChaCha20Poly1305Cipher`].
pub struct Vault<S: Store, C: Cipher = ChaCha20Poly1305Cipher> {
    store: Arc<S>,
    cipher: C,
    kdf_params: KdfParams,
    tokens: TokenTable,
}

impl<S: Store> Vault<S, ChaCha20Poly1305Cipher> {
    /// Create a vault service with the default cipher and KDF calibration.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_cipher(store, ChaCha20Poly1305Cipher, KdfParams::default())
    }

    /// Create a vault service with explicit KDF parameters.
    pub fn with_params(store: Arc<S>, kdf_params: KdfParams) -> Self {
        Self::with_cipher(store, ChaCha20Poly1305Cipher, kdf_params)
    }
}

impl<S: Store, C: Cipher> Vault<S, C> {
    pub fn with_cipher(store: Arc<S>, cipher: C, kdf_params: KdfParams) -> Self {
        Self {
            store,
            cipher,
            kdf_params,
            tokens: TokenTable::default(),
        }
    }

    /// Replace the default 30-minute token idle window.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.tokens = TokenTable::new(ttl);
        self
    }

    /// The process-wide token table (shared with status reporting).
    #[must_use]
    pub fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    /// Query the current vault status for a user.
    pub async fn status(&self, user_id: &str) -> Result<VaultStatus, VaultError> {
        let initialized = self.load(user_id).await?.is_some();
        let unlocked = initialized && self.tokens.has_live_token(user_id).await;
        Ok(VaultStatus {
            initialized,
            unlocked,
        })
    }

    /// Initialize a vault for a user.
    ///
    /// Generates a fresh master key, wraps it under the passphrase and under
    /// a recovery phrase (generated when not supplied), and persists the
    /// stored vault with an empty secret map. Returns the recovery phrase —
    /// this is the only time it is ever available.
    pub async fn init(
        &self,
        user_id: &str,
        passphrase: &str,
        recovery_phrase: Option<&str>,
    ) -> Result<String, VaultError> {
        if self.load(user_id).await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let mut master_key = Zeroizing::new([0u8; 32]);
        rand::RngCore::fill_bytes(&mut rand::rng(), master_key.as_mut());

        let phrase = recovery_phrase
            .map(mnemonic::normalize_phrase)
            .unwrap_or_else(mnemonic::generate_phrase);

        let passphrase_wrapper = KeyWrapper::seal(
            &self.cipher,
            &self.kdf_params,
            passphrase.as_bytes(),
            &master_key,
        )?;
        let recovery_wrapper =
            KeyWrapper::seal(&self.cipher, &self.kdf_params, phrase.as_bytes(), &master_key)?;
        let encrypted_secrets = self.encrypt_secrets(&master_key, &SecretMap::new())?;

        let now = gangway_common::time::now_millis();
        let stored = StoredVault {
            version: VAULT_VERSION,
            passphrase_wrapper,
            recovery_wrapper,
            encrypted_secrets,
            created_at: now,
            updated_at: now,
        };
        self.persist(user_id, &stored).await?;

        tracing::info!(user_id = %user_id, "vault initialized");
        Ok(phrase)
    }

    /// Unlock with the master passphrase. Returns an opaque token with its TTL.
    pub async fn unlock(
        &self,
        user_id: &str,
        passphrase: &str,
    ) -> Result<UnlockOutcome, VaultError> {
        let stored = self.load(user_id).await?.ok_or(VaultError::NotInitialized)?;

        let master_key = stored
            .passphrase_wrapper
            .open(&self.cipher, passphrase.as_bytes())?;
        let token = self.tokens.issue(user_id, master_key).await;

        tracing::info!(user_id = %user_id, "vault unlocked");
        Ok(UnlockOutcome {
            token,
            ttl_secs: self.tokens.ttl().as_secs(),
        })
    }

    /// Unlock via the recovery phrase and rotate both wrappers.
    ///
    /// The master key is unchanged, so the secrets blob survives as-is; only
    /// the wrappers are rewritten — the passphrase wrapper under
    /// `new_passphrase`, the recovery wrapper under `next_recovery_phrase`
    /// (freshly generated when absent).
    pub async fn recover(
        &self,
        user_id: &str,
        recovery_phrase: &str,
        new_passphrase: &str,
        next_recovery_phrase: Option<&str>,
    ) -> Result<RecoverOutcome, VaultError> {
        let mut stored = self.load(user_id).await?.ok_or(VaultError::NotInitialized)?;

        let normalized = mnemonic::normalize_phrase(recovery_phrase);
        let master_key = stored
            .recovery_wrapper
            .open(&self.cipher, normalized.as_bytes())?;

        let next_phrase = next_recovery_phrase
            .map(mnemonic::normalize_phrase)
            .unwrap_or_else(mnemonic::generate_phrase);

        stored.passphrase_wrapper = KeyWrapper::seal(
            &self.cipher,
            &self.kdf_params,
            new_passphrase.as_bytes(),
            &master_key,
        )?;
        stored.recovery_wrapper = KeyWrapper::seal(
            &self.cipher,
            &self.kdf_params,
            next_phrase.as_bytes(),
            &master_key,
        )?;
        stored.updated_at = gangway_common::time::now_millis();
        self.persist(user_id, &stored).await?;

        let token = self.tokens.issue(user_id, master_key).await;

        tracing::info!(user_id = %user_id, "vault recovered, wrappers rotated");
        Ok(RecoverOutcome {
            token,
            ttl_secs: self.tokens.ttl().as_secs(),
            recovery_phrase: next_phrase,
        })
    }

    /// Drop a token; the associated in-memory master key is zeroed.
    pub async fn lock(&self, token: &str) {
        self.tokens.revoke(token).await;
    }

    /// Run `f` against the decrypted secret map.
    ///
    /// The token must belong to `user_id` and be inside its idle window (the
    /// window refreshes on use). If `f` mutates the handle, the map is
    /// re-encrypted under a fresh nonce and written back. Plaintext secrets
    /// never outlive this call in any path the vault controls.
    pub async fn with_secrets<R>(
        &self,
        token: &str,
        user_id: &str,
        f: impl FnOnce(&mut SecretsHandle) -> R,
    ) -> Result<R, VaultError> {
        let master_key = self.tokens.master_key_for(token, user_id).await?;
        let mut stored = self.load(user_id).await?.ok_or(VaultError::NotInitialized)?;

        let map = self.decrypt_secrets(&master_key, &stored.encrypted_secrets)?;
        let mut handle = SecretsHandle { map, dirty: false };
        let result = f(&mut handle);

        if handle.dirty {
            stored.encrypted_secrets = self.encrypt_secrets(&master_key, &handle.map)?;
            stored.updated_at = gangway_common::time::now_millis();
            self.persist(user_id, &stored).await?;
            tracing::debug!(user_id = %user_id, "vault secrets updated");
        }

        Ok(result)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    async fn load(&self, user_id: &str) -> Result<Option<StoredVault>, VaultError> {
        match self.store.get_json(&keys::vault(user_id)).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|_| VaultError::Corrupted),
            None => Ok(None),
        }
    }

    async fn persist(&self, user_id: &str, stored: &StoredVault) -> Result<(), VaultError> {
        let value = serde_json::to_value(stored).map_err(|_| VaultError::Corrupted)?;
        self.store.put_json(&keys::vault(user_id), &value).await?;
        Ok(())
    }

    fn encrypt_secrets(
        &self,
        master_key: &[u8; 32],
        map: &SecretMap,
    ) -> Result<String, VaultError> {
        let plaintext =
            Zeroizing::new(serde_json::to_vec(map).map_err(|_| VaultError::Corrupted)?);
        let encrypted = self.cipher.encrypt(master_key, &plaintext, SECRETS_AAD)?;

        let mut blob = Vec::with_capacity(1 + encrypted.len());
        blob.push(self.cipher.version_tag());
        blob.extend_from_slice(&encrypted);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    fn decrypt_secrets(
        &self,
        master_key: &[u8; 32],
        blob_b64: &str,
    ) -> Result<SecretMap, VaultError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(blob_b64)
            .map_err(|_| VaultError::Corrupted)?;
        if blob.is_empty() || blob[0] != self.cipher.version_tag() {
            return Err(VaultError::Corrupted);
        }

        let plaintext = Zeroizing::new(self.cipher.decrypt(master_key, &blob[1..], SECRETS_AAD)?);
        serde_json::from_slice(&plaintext).map_err(|_| VaultError::Corrupted)
    }
}
