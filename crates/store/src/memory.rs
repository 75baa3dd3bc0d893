//! In-memory store for tests and embedded use.

use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::{Store, StoreError};

/// Process-local [`Store`] holding blobs and logs in maps.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, serde_json::Value>>,
    lines: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a JSONL log, for assertions.
    pub async fn lines(&self, key: &str) -> Vec<serde_json::Value> {
        self.lines.read().await.get(key).cloned().unwrap_or_default()
    }

    /// All keys holding a blob, for assertions.
    pub async fn object_keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn append_json_line(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.lines
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push(value.clone());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get_json("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let value = serde_json::json!({"a": 1});
        store.put_json("k", &value).await.unwrap();
        assert_eq!(store.get_json("k").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn put_replaces_whole_object() {
        let store = MemoryStore::new();
        store.put_json("k", &serde_json::json!({"a": 1})).await.unwrap();
        store.put_json("k", &serde_json::json!({"b": 2})).await.unwrap();
        assert_eq!(
            store.get_json("k").await.unwrap(),
            Some(serde_json::json!({"b": 2}))
        );
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .append_json_line("log", &serde_json::json!({"i": i}))
                .await
                .unwrap();
        }
        let lines = store.lines("log").await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["i"], 2);
    }
}
