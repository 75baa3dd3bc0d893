//! Process-wide unlock-token table.
//!
//! A token binds an opaque random string to `(userId, masterKey)` with a
//! sliding idle window: every authorized use refreshes the timestamp. Tokens
//! live only in process memory and are zeroed on removal.

use std::collections::HashMap;

use {
    tokio::{sync::RwLock, time::Instant},
    zeroize::Zeroizing,
};

use crate::error::VaultError;

/// Default idle window before a token expires (30 minutes).
pub const DEFAULT_TTL_SECS: u64 = 30 * 60;

struct TokenEntry {
    user_id: String,
    master_key: Zeroizing<[u8; 32]>,
    last_access: Instant,
}

/// Sliding-TTL unlock tokens, keyed by opaque token string.
pub struct TokenTable {
    ttl: std::time::Duration,
    entries: RwLock<HashMap<String, TokenEntry>>,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl TokenTable {
    #[must_use]
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> std::time::Duration {
        self.ttl
    }

    /// Register a freshly unwrapped master key and mint its token.
    pub async fn issue(&self, user_id: &str, master_key: Zeroizing<[u8; 32]>) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.entries.write().await.insert(token.clone(), TokenEntry {
            user_id: user_id.to_string(),
            master_key,
            last_access: Instant::now(),
        });
        token
    }

    /// Authorize a token for `user_id`: the entry must exist, belong to the
    /// user, and be inside its idle window. Success refreshes the window and
    /// returns a copy of the master key.
    pub async fn master_key_for(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(token) else {
            return Err(VaultError::SessionExpired);
        };
        if entry.last_access.elapsed() > self.ttl {
            entries.remove(token);
            return Err(VaultError::SessionExpired);
        }
        if entry.user_id != user_id {
            return Err(VaultError::SessionExpired);
        }
        entry.last_access = Instant::now();
        Ok(entry.master_key.clone())
    }

    /// Drop a token. The key buffer is zeroed on drop.
    pub async fn revoke(&self, token: &str) {
        self.entries.write().await.remove(token);
    }

    /// Whether the user holds at least one non-expired token.
    pub async fn has_live_token(&self, user_id: &str) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|e| e.user_id == user_id && e.last_access.elapsed() <= self.ttl)
    }

    /// Remove every expired entry.
    pub async fn sweep(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, e| e.last_access.elapsed() <= ttl);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Zeroizing<[u8; 32]> {
        Zeroizing::new([byte; 32])
    }

    #[tokio::test]
    async fn issue_and_authorize() {
        let table = TokenTable::default();
        let token = table.issue("u1", key(0x11)).await;

        let master = table.master_key_for(&token, "u1").await.unwrap();
        assert_eq!(*master, [0x11; 32]);
    }

    #[tokio::test]
    async fn wrong_user_is_rejected() {
        let table = TokenTable::default();
        let token = table.issue("u1", key(0x11)).await;

        let err = table.master_key_for(&token, "u2").await.unwrap_err();
        assert!(matches!(err, VaultError::SessionExpired));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let table = TokenTable::default();
        let err = table.master_key_for("nope", "u1").await.unwrap_err();
        assert!(matches!(err, VaultError::SessionExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_expiry_is_sliding() {
        let table = TokenTable::new(std::time::Duration::from_secs(60));
        let token = table.issue("u1", key(0x11)).await;

        // Touch at 40s keeps the token alive past the original deadline.
        tokio::time::advance(std::time::Duration::from_secs(40)).await;
        table.master_key_for(&token, "u1").await.unwrap();

        tokio::time::advance(std::time::Duration::from_secs(40)).await;
        table.master_key_for(&token, "u1").await.unwrap();

        // 61s idle expires it.
        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        let err = table.master_key_for(&token, "u1").await.unwrap_err();
        assert!(matches!(err, VaultError::SessionExpired));
    }

    #[tokio::test]
    async fn revoke_removes_token() {
        let table = TokenTable::default();
        let token = table.issue("u1", key(0x11)).await;
        assert!(table.has_live_token("u1").await);

        table.revoke(&token).await;
        assert!(!table.has_live_token("u1").await);
        assert!(table.master_key_for(&token, "u1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_expired_entries() {
        let table = TokenTable::new(std::time::Duration::from_secs(10));
        table.issue("u1", key(0x11)).await;
        tokio::time::advance(std::time::Duration::from_secs(11)).await;

        table.sweep().await;
        assert!(!table.has_live_token("u1").await);
    }
}
