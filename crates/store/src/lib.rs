//! Abstract key/value persistence for the gateway.
//!
//! The gateway depends only on this shape: whole-object JSON blobs addressed
//! by string keys plus append-only JSON Lines logs. [`MemoryStore`] backs
//! tests and embedded use, [`FileStore`] persists under a base directory.

pub mod error;
pub mod file;
pub mod keys;
pub mod memory;

use {async_trait::async_trait, serde::Serialize, serde::de::DeserializeOwned};

pub use {error::StoreError, file::FileStore, memory::MemoryStore};

/// Object-safe persistence interface.
///
/// Implementations own their concurrency: any interleaving of calls must
/// leave each key either untouched or holding a complete value, and
/// [`append_json_line`](Store::append_json_line) must be atomic per line.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a JSON blob. `None` when the key has never been written.
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Whole-object replace.
    async fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError>;

    /// Append one line to a JSON Lines log.
    async fn append_json_line(&self, key: &str, value: &serde_json::Value)
    -> Result<(), StoreError>;
}

/// Typed convenience layer over [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_json(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn put<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.put_json(key, &serde_json::to_value(value)?).await
    }

    async fn append<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.append_json_line(key, &serde_json::to_value(value)?)
            .await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
