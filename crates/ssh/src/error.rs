use gangway_store::StoreError;

/// Errors from parsing and host-key trust.
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    /// The input did not start with an `ssh` token.
    #[error("not an ssh command")]
    NotSshCommand,

    /// A flag that requires a value was the last token.
    #[error("flag {0} requires a value")]
    MissingFlagValue(String),

    /// Unparseable port number.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// A `-L`/`-R`/`-D` argument did not match its grammar.
    #[error("invalid forward spec: {0}")]
    InvalidForwardSpec(String),

    /// The presented host key differs from the recorded fingerprint.
    #[error("SSH host key mismatch detected")]
    HostKeyMismatch,

    /// Persistence error while consulting the trust store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
