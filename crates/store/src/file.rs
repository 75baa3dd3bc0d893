//! Filesystem store: JSON blobs plus locked JSONL appends under a base dir.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::PathBuf,
};

use {async_trait::async_trait, fd_lock::RwLock};

use crate::{Store, StoreError};

/// [`Store`] backed by plain files. Keys map to relative paths; appends take
/// an advisory write lock so concurrent writers interleave whole lines only.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    /// Read every line of a JSONL log. Malformed lines are skipped with a
    /// warning rather than failing the whole read.
    pub async fn read_json_lines(&self, key: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || -> Result<Vec<serde_json::Value>, StoreError> {
            if !path.exists() {
                return Ok(vec![]);
            }
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            let mut values = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str(trimmed) {
                    Ok(value) => values.push(value),
                    Err(e) => {
                        tracing::warn!("skipping malformed JSONL line: {e}");
                    },
                }
            }
            Ok(values)
        })
        .await
        .map_err(|e| StoreError::Lock(e.to_string()))?
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || -> Result<Option<serde_json::Value>, StoreError> {
            if !path.exists() {
                return Ok(None);
            }
            let data = fs::read_to_string(&path)?;
            Ok(Some(serde_json::from_str(&data)?))
        })
        .await
        .map_err(|e| StoreError::Lock(e.to_string()))?
    }

    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let data = serde_json::to_string(value)?;
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            // Write to a sibling temp file, then rename over the target so
            // readers never observe a half-written blob.
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, &data)?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Lock(e.to_string()))?
    }

    async fn append_json_line(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let line = serde_json::to_string(value)?;
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut lock = RwLock::new(file);
            let mut guard = lock.write().map_err(|e| StoreError::Lock(e.to_string()))?;
            writeln!(*guard, "{line}")?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Lock(e.to_string()))?
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (_dir, store) = temp_store();
        assert!(store.get_json("users/u/vault.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_creates_parent_dirs() {
        let (_dir, store) = temp_store();
        let value = serde_json::json!({"v": 1});
        store.put_json("users/u1/vault.json", &value).await.unwrap();
        assert_eq!(
            store.get_json("users/u1/vault.json").await.unwrap(),
            Some(value)
        );
    }

    #[tokio::test]
    async fn append_then_read_back() {
        let (_dir, store) = temp_store();
        for i in 0..5 {
            store
                .append_json_line("audit/2026-08-01.jsonl", &serde_json::json!({"i": i}))
                .await
                .unwrap();
        }
        let lines = store.read_json_lines("audit/2026-08-01.jsonl").await.unwrap();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4]["i"], 4);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let (dir, store) = temp_store();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, "{\"ok\":1}\nnot-json\n{\"ok\":2}\n").unwrap();
        let lines = store.read_json_lines("log.jsonl").await.unwrap();
        assert_eq!(lines.len(), 2);
    }
}
