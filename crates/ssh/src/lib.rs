//! SSH-side leaf pieces of the gateway: the `ssh …` command parser, the
//! per-user host-key trust store (TOFU), and credential selection.

pub mod command;
pub mod credentials;
pub mod error;
pub mod known_hosts;

pub use {
    command::{DynamicForward, LocalForward, RemoteForward, SshCommand, parse_ssh_command},
    credentials::{AuthMethod, CredentialInput},
    error::SshError,
    known_hosts::{KnownHosts, Trust, evaluate, fingerprint_sha256},
};
