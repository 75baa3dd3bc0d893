use thiserror::Error;

/// Errors produced by store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock failed: {0}")]
    Lock(String),
}
