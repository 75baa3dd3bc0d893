//! russh client glue: connect with host-key verification, then authenticate.
//!
//! The handler records the presented fingerprint and answers the handshake
//! from the recorded known-hosts state: no record accepts (trust on first
//! use — the caller persists the fingerprint only after the whole build
//! succeeds), a matching record accepts, a differing record refuses the key
//! and the connect surfaces as [`SshError::HostKeyMismatch`].
//!
//! Inbound `forwarded-tcpip` channels are handed off to the session's
//! remote-forward dispatcher through an unbounded channel.

use std::sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicBool, Ordering},
};

use {
    russh::{
        Channel,
        client::{self, Msg},
        keys::{self, HashAlg, PrivateKeyWithHashAlg, PublicKey},
    },
    tokio::sync::mpsc,
    tracing::debug,
};

use gangway_ssh::{AuthMethod, SshError, Trust, evaluate};

use crate::error::GatewayError;

/// An inbound channel the peer opened for a remote (`-R`) forward.
pub struct ForwardedChannel {
    pub channel: Channel<Msg>,
    /// Address the peer's listener was bound to.
    pub connected_address: String,
    pub connected_port: u32,
    pub originator_address: String,
    pub originator_port: u32,
}

/// Client-side handler wired to the trust store verdict.
pub struct ClientHandler {
    known_fingerprint: Option<String>,
    observed: Arc<StdMutex<Option<String>>>,
    mismatch: Arc<AtomicBool>,
    forwarded_tx: mpsc::UnboundedSender<ForwardedChannel>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        if let Ok(mut observed) = self.observed.lock() {
            *observed = Some(fingerprint.clone());
        }

        match evaluate(self.known_fingerprint.as_deref(), &fingerprint) {
            Trust::FirstUse | Trust::Match => Ok(true),
            Trust::Mismatch => {
                self.mismatch.store(true, Ordering::SeqCst);
                Ok(false)
            },
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        // The dispatcher may already be gone during teardown; the channel is
        // dropped (closed) in that case.
        let _ = self.forwarded_tx.send(ForwardedChannel {
            channel,
            connected_address: connected_address.to_string(),
            connected_port,
            originator_address: originator_address.to_string(),
            originator_port,
        });
        Ok(())
    }
}

/// Shared control-plane access to the transport.
///
/// Channel opens and forward requests are serialized through one mutex; the
/// lock spans only the control round-trip, never the data piping that
/// follows, so concurrent forwarders contend for microseconds of queueing
/// rather than each other's traffic.
#[derive(Clone)]
pub struct TransportControl {
    handle: Arc<tokio::sync::Mutex<client::Handle<ClientHandler>>>,
}

impl TransportControl {
    #[must_use]
    pub fn new(handle: client::Handle<ClientHandler>) -> Self {
        Self {
            handle: Arc::new(tokio::sync::Mutex::new(handle)),
        }
    }

    /// Open a session channel (shell, exec, subsystem).
    pub async fn open_session(&self) -> Result<Channel<Msg>, russh::Error> {
        self.handle.lock().await.channel_open_session().await
    }

    /// Open a `direct-tcpip` channel toward `(host, port)`.
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator: &str,
        originator_port: u32,
    ) -> Result<Channel<Msg>, russh::Error> {
        self.handle
            .lock()
            .await
            .channel_open_direct_tcpip(host, port, originator, originator_port)
            .await
    }

    /// Ask the peer to listen on `(address, port)` for a remote forward.
    pub async fn tcpip_forward(&self, address: &str, port: u32) -> Result<(), russh::Error> {
        self.handle
            .lock()
            .await
            .tcpip_forward(address, port)
            .await
            .map(|_| ())
    }

    /// Cancel a previously requested remote forward.
    pub async fn cancel_tcpip_forward(
        &self,
        address: &str,
        port: u32,
    ) -> Result<(), russh::Error> {
        self.handle
            .lock()
            .await
            .cancel_tcpip_forward(address, port)
            .await
    }

    /// Tear the transport down. Best-effort; errors are ignored because the
    /// peer may already be gone.
    pub async fn disconnect(&self) {
        let _ = self
            .handle
            .lock()
            .await
            .disconnect(russh::Disconnect::ByApplication, "session closed", "en")
            .await;
    }
}

/// A connected, authenticated transport plus what the handshake observed.
pub struct Transport {
    pub handle: client::Handle<ClientHandler>,
    /// The peer's `SHA256:<base64>` fingerprint.
    pub fingerprint: String,
    /// Whether this host had no recorded fingerprint before the connect.
    pub first_use: bool,
}

/// Open and authenticate an SSH transport.
pub async fn connect_transport(
    host: &str,
    port: u16,
    username: &str,
    auth: AuthMethod,
    known_fingerprint: Option<String>,
    connect_timeout: std::time::Duration,
    forwarded_tx: mpsc::UnboundedSender<ForwardedChannel>,
) -> Result<Transport, GatewayError> {
    let observed = Arc::new(StdMutex::new(None));
    let mismatch = Arc::new(AtomicBool::new(false));
    let first_use = known_fingerprint.is_none();

    let handler = ClientHandler {
        known_fingerprint,
        observed: Arc::clone(&observed),
        mismatch: Arc::clone(&mismatch),
        forwarded_tx,
    };

    let config = Arc::new(client::Config {
        inactivity_timeout: None,
        ..Default::default()
    });

    let connected = tokio::time::timeout(
        connect_timeout,
        client::connect(config, (host, port), handler),
    )
    .await;

    let mut handle = match connected {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            if mismatch.load(Ordering::SeqCst) {
                return Err(SshError::HostKeyMismatch.into());
            }
            return Err(GatewayError::Transport(e));
        },
        Err(_) => {
            return Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "ssh connect timed out",
            )));
        },
    };

    let fingerprint = observed
        .lock()
        .ok()
        .and_then(|o| o.clone())
        .ok_or(GatewayError::FingerprintVerification)?;

    authenticate(&mut handle, username, auth).await?;

    debug!(host = %host, port, user = %username, "ssh transport ready");
    Ok(Transport {
        handle,
        fingerprint,
        first_use,
    })
}

async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    username: &str,
    auth: AuthMethod,
) -> Result<(), GatewayError> {
    match auth {
        AuthMethod::Password(password) => {
            let result = handle.authenticate_password(username, password).await?;
            if !result.success() {
                return Err(GatewayError::AuthenticationFailed);
            }
        },
        AuthMethod::Key { key, passphrase } => {
            let private_key = keys::decode_secret_key(&key, passphrase.as_deref())
                .map_err(|e| GatewayError::InvalidPrivateKey(e.to_string()))?;
            let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
            let result = handle
                .authenticate_publickey(
                    username,
                    PrivateKeyWithHashAlg::new(Arc::new(private_key), hash_alg),
                )
                .await?;
            if !result.success() {
                return Err(GatewayError::AuthenticationFailed);
            }
        },
        AuthMethod::None => return Err(GatewayError::MissingCredentials),
    }
    Ok(())
}
