//! SSH gateway kernel: sessions, forwarders, SFTP, exec, and the JSON
//! session bus, over an abstract store and a per-user vault.
//!
//! The outer layer (HTTP routes, WebSocket upgrade, user auth) is a
//! collaborator: it hands this crate a trusted user id, bridges
//! [`bus::SessionSocket`] channels to real WebSockets, and passes vault
//! tokens through to the operations that unwrap secrets.

pub mod audit;
pub mod bus;
pub mod config;
pub mod error;
pub mod exec;
pub mod forward;
pub mod hosts;
pub mod session;
pub mod sftp;
pub mod socks;
pub mod transport;

pub use {
    bus::{ClientFrame, ServerFrame, SessionSocket, SocketMessage, SocketSet},
    config::GatewayConfig,
    error::GatewayError,
    session::{CreateSessionInput, Gateway, Session, SessionInfo},
};
