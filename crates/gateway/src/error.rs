//! Gateway error type.
//!
//! The display strings here are the stable surface reported to callers;
//! session sockets never see user errors, and callers never see raw
//! transport internals.

use {gangway_ssh::SshError, gangway_store::StoreError, gangway_vault::VaultError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Target resolution came up short after explicit input, saved host, and
    /// parsed command were consulted.
    #[error("host and username are required")]
    MissingTarget,

    #[error("Host not in allow-list")]
    HostNotAllowed,

    #[error("unknown saved host: {0}")]
    UnknownSavedHost(String),

    #[error("vault token is required to use a stored secret")]
    VaultTokenRequired,

    #[error("secret not found in vault: {0}")]
    UnknownSecret(String),

    #[error("password or private key is required")]
    MissingCredentials,

    #[error("SSH authentication failed")]
    AuthenticationFailed,

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Failed to verify SSH host key fingerprint")]
    FingerprintVerification,

    #[error("forward bind must be loopback: {0}")]
    NonLoopbackBind(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("binary frames are not accepted on the session bus")]
    BinaryFrameRejected,

    #[error("command timed out")]
    CommandTimeout,

    #[error("exec session not found: {0}")]
    ExecSessionNotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("Path is not a directory")]
    NotADirectory,

    #[error("Path is not a file")]
    NotAFile,

    #[error("Symlink loop detected")]
    SymlinkLoop,

    #[error("Upload exceeds limit")]
    UploadTooLarge,

    #[error("Download exceeds limit")]
    DownloadTooLarge,

    #[error("Delete depth exceeded")]
    DeleteDepthExceeded,

    #[error("failed to delete {path}: {message}")]
    DeleteFailed { path: String, message: String },

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ssh transport error: {0}")]
    Transport(#[from] russh::Error),

    #[error("sftp error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
