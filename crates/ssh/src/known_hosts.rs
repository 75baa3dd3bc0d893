//! Per-user host-key trust store: trust-on-first-use, refuse-on-change.
//!
//! Fingerprints use the OpenSSH presentation `SHA256:<base64>` over the
//! key's wire encoding. Recorded fingerprints are compared in constant time,
//! and a new fingerprint is persisted only after the full connection
//! succeeds, so failed or adversarial probes never teach the store anything.

use std::{collections::HashMap, sync::Arc};

use {
    base64::Engine,
    sha2::{Digest, Sha256},
};

use gangway_store::{Store, StoreExt, keys};

use crate::error::SshError;

/// Verdict for a presented host key against the recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// No record for this host yet; accept and persist after success.
    FirstUse,
    /// Record present and identical.
    Match,
    /// Record present and different; the connection must be refused.
    Mismatch,
}

/// `"SHA256:" + base64(sha256(key))`, unpadded, as OpenSSH prints it.
#[must_use]
pub fn fingerprint_sha256(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    format!(
        "SHA256:{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest)
    )
}

/// Compare a recorded fingerprint against a presented one.
#[must_use]
pub fn evaluate(known: Option<&str>, presented: &str) -> Trust {
    match known {
        None => Trust::FirstUse,
        Some(recorded) if constant_time_eq(recorded.as_bytes(), presented.as_bytes()) => {
            Trust::Match
        },
        Some(_) => Trust::Mismatch,
    }
}

/// Byte equality without early exit. Fingerprints are fixed-width, so the
/// length check itself leaks nothing useful.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Store-backed known-hosts map, one per user.
pub struct KnownHosts<S: Store> {
    store: Arc<S>,
}

impl<S: Store> KnownHosts<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The recorded fingerprint for a host, if any.
    pub async fn lookup(&self, user_id: &str, host: &str) -> Result<Option<String>, SshError> {
        let map: Option<HashMap<String, String>> =
            self.store.get(&keys::known_hosts(user_id)).await?;
        Ok(map.and_then(|m| m.get(host).cloned()))
    }

    /// Persist a fingerprint observed on a fully successful connection.
    pub async fn record(
        &self,
        user_id: &str,
        host: &str,
        fingerprint: &str,
    ) -> Result<(), SshError> {
        let key = keys::known_hosts(user_id);
        let mut map: HashMap<String, String> =
            self.store.get(&key).await?.unwrap_or_default();
        map.insert(host.to_string(), fingerprint.to_string());
        self.store.put(&key, &map).await?;

        tracing::info!(user_id = %user_id, host = %host, "recorded host key fingerprint");
        Ok(())
    }
}
