//! Saved SSH hosts, one list per user.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use {
    gangway_common::time,
    gangway_store::{Store, StoreExt, keys},
};

use crate::error::GatewayError;

/// A saved connection target. `secret_id` points into the user's vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedHost {
    pub id: String,
    pub label: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Fields for creating or replacing a saved host.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedHostInput {
    pub label: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub secret_id: Option<String>,
}

fn default_port() -> u16 {
    22
}

/// Store-backed saved-host list.
pub struct SavedHosts<S: Store> {
    store: Arc<S>,
}

impl<S: Store> SavedHosts<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<SavedHost>, GatewayError> {
        let hosts: Option<Vec<SavedHost>> = self.store.get(&keys::ssh_hosts(user_id)).await?;
        Ok(hosts.unwrap_or_default())
    }

    pub async fn get(&self, user_id: &str, host_id: &str) -> Result<Option<SavedHost>, GatewayError> {
        Ok(self
            .list(user_id)
            .await?
            .into_iter()
            .find(|h| h.id == host_id))
    }

    /// Add a new saved host and return it.
    pub async fn create(
        &self,
        user_id: &str,
        input: SavedHostInput,
    ) -> Result<SavedHost, GatewayError> {
        let now = time::now_millis();
        let host = SavedHost {
            id: uuid::Uuid::new_v4().to_string(),
            label: input.label,
            host: input.host,
            port: input.port,
            username: input.username,
            secret_id: input.secret_id,
            created_at: now,
            updated_at: now,
        };

        let mut hosts = self.list(user_id).await?;
        hosts.push(host.clone());
        self.store.put(&keys::ssh_hosts(user_id), &hosts).await?;
        Ok(host)
    }

    /// Replace the mutable fields of an existing saved host.
    pub async fn update(
        &self,
        user_id: &str,
        host_id: &str,
        input: SavedHostInput,
    ) -> Result<Option<SavedHost>, GatewayError> {
        let mut hosts = self.list(user_id).await?;
        let Some(existing) = hosts.iter_mut().find(|h| h.id == host_id) else {
            return Ok(None);
        };

        existing.label = input.label;
        existing.host = input.host;
        existing.port = input.port;
        existing.username = input.username;
        existing.secret_id = input.secret_id;
        existing.updated_at = time::now_millis();
        let updated = existing.clone();

        self.store.put(&keys::ssh_hosts(user_id), &hosts).await?;
        Ok(Some(updated))
    }

    /// Remove a saved host. Returns whether anything was deleted.
    pub async fn delete(&self, user_id: &str, host_id: &str) -> Result<bool, GatewayError> {
        let mut hosts = self.list(user_id).await?;
        let before = hosts.len();
        hosts.retain(|h| h.id != host_id);
        if hosts.len() == before {
            return Ok(false);
        }
        self.store.put(&keys::ssh_hosts(user_id), &hosts).await?;
        Ok(true)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, gangway_store::MemoryStore};

    fn input(label: &str) -> SavedHostInput {
        SavedHostInput {
            label: label.to_string(),
            host: "10.0.0.5".to_string(),
            port: 22,
            username: "deploy".to_string(),
            secret_id: None,
        }
    }

    #[tokio::test]
    async fn create_list_get() {
        let hosts = SavedHosts::new(Arc::new(MemoryStore::new()));
        let created = hosts.create("u1", input("prod")).await.unwrap();

        let listed = hosts.list("u1").await.unwrap();
        assert_eq!(listed, vec![created.clone()]);
        assert_eq!(hosts.get("u1", &created.id).await.unwrap(), Some(created));
        assert_eq!(hosts.get("u1", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_are_per_user() {
        let hosts = SavedHosts::new(Arc::new(MemoryStore::new()));
        hosts.create("u1", input("prod")).await.unwrap();
        assert!(hosts.list("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_rewrites_fields() {
        let hosts = SavedHosts::new(Arc::new(MemoryStore::new()));
        let created = hosts.create("u1", input("prod")).await.unwrap();

        let mut changed = input("staging");
        changed.port = 2222;
        changed.secret_id = Some("sec-1".to_string());
        let updated = hosts
            .update("u1", &created.id, changed)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.label, "staging");
        assert_eq!(updated.port, 2222);
        assert_eq!(updated.secret_id.as_deref(), Some("sec-1"));
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn delete_is_reported() {
        let hosts = SavedHosts::new(Arc::new(MemoryStore::new()));
        let created = hosts.create("u1", input("prod")).await.unwrap();

        assert!(hosts.delete("u1", &created.id).await.unwrap());
        assert!(!hosts.delete("u1", &created.id).await.unwrap());
        assert!(hosts.list("u1").await.unwrap().is_empty());
    }
}
