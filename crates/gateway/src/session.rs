//! The session kernel: build, run, and tear down SSH sessions.
//!
//! A [`Session`] owns the transport, the interactive shell, every forwarder,
//! the SFTP subsystem, and the attached sockets; they all share its
//! lifetime. The build path is strictly ordered and a failure at any step
//! leaves no partial state behind. Teardown is idempotent: listeners close
//! before the transport so no new channels can start mid-shutdown, and
//! exactly one disconnect audit event is written per connected session.

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    russh::{
        Channel, ChannelMsg,
        client::Msg,
    },
    serde::{Deserialize, Serialize},
    tokio::{
        sync::{Mutex, RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use {
    gangway_common::time,
    gangway_ssh::{CredentialInput, KnownHosts, parse_ssh_command},
    gangway_store::Store,
    gangway_vault::Vault,
};

use crate::{
    audit::{AuditEvent, AuditLog},
    bus::{ClientFrame, ServerFrame, SessionSocket, SocketSet},
    config::GatewayConfig,
    error::GatewayError,
    exec::ExecRegistry,
    forward::{self, LocalForwardHandle, RemoteMapping},
    hosts::SavedHosts,
    sftp::SftpService,
    socks::{self, SocksHandle},
    transport::{self, TransportControl},
};

// ── Inputs and projections ──────────────────────────────────────────────────

/// Everything `create_session` accepts: an optional raw `ssh …` command, an
/// optional saved-host reference, explicit overrides, and credential
/// sources. Explicit fields beat the saved host, which beats the parsed
/// command.
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateSessionInput {
    pub command: Option<String>,
    pub host_id: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub secret_id: Option<String>,
    pub vault_token: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    pub cols: Option<u32>,
    pub rows: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub created_at: u64,
    pub connected: bool,
}

// ── Session ─────────────────────────────────────────────────────────────────

enum ShellCmd {
    Data(Vec<u8>),
    Resize(u32, u32),
    Close,
}

#[derive(Default)]
struct SessionResources {
    local_forwards: Vec<LocalForwardHandle>,
    socks_servers: Vec<SocksHandle>,
    remote_mappings: Vec<RemoteMapping>,
    dispatcher: Option<JoinHandle<()>>,
    shell_task: Option<JoinHandle<()>>,
}

/// One live SSH session. Transient and in-memory only.
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub created_at: u64,
    /// Monotonic: flips true → false exactly once, never reopens.
    connected: AtomicBool,
    transport: TransportControl,
    sockets: Arc<SocketSet>,
    shell_tx: mpsc::UnboundedSender<ShellCmd>,
    resources: Mutex<SessionResources>,
    sftp: SftpService,
}

impl Session {
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            created_at: self.created_at,
            connected: self.is_connected(),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The SFTP subsystem riding this session's transport.
    #[must_use]
    pub fn sftp(&self) -> &SftpService {
        &self.sftp
    }

    /// Control-plane access for the exec service.
    #[must_use]
    pub fn transport(&self) -> &TransportControl {
        &self.transport
    }

    fn write_shell(&self, bytes: Vec<u8>) {
        let _ = self.shell_tx.send(ShellCmd::Data(bytes));
    }

    fn resize_shell(&self, cols: u32, rows: u32) {
        let _ = self.shell_tx.send(ShellCmd::Resize(cols, rows));
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────────

/// Process-wide session manager and the entry point for every operation the
/// outer layer exposes.
pub struct Gateway<S: Store> {
    config: GatewayConfig,
    vault: Arc<Vault<S>>,
    saved_hosts: SavedHosts<S>,
    known_hosts: KnownHosts<S>,
    audit: AuditLog<S>,
    exec: Arc<ExecRegistry>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl<S: Store + 'static> Gateway<S> {
    pub fn new(store: Arc<S>, config: GatewayConfig) -> Arc<Self> {
        let vault = Arc::new(
            Vault::new(Arc::clone(&store))
                .with_token_ttl(std::time::Duration::from_secs(config.vault_token_ttl_secs)),
        );
        Self::with_vault(store, config, vault)
    }

    pub fn with_vault(store: Arc<S>, config: GatewayConfig, vault: Arc<Vault<S>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            vault,
            saved_hosts: SavedHosts::new(Arc::clone(&store)),
            known_hosts: KnownHosts::new(Arc::clone(&store)),
            audit: AuditLog::new(store),
            exec: Arc::new(ExecRegistry::new()),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn vault(&self) -> &Arc<Vault<S>> {
        &self.vault
    }

    #[must_use]
    pub fn saved_hosts(&self) -> &SavedHosts<S> {
        &self.saved_hosts
    }

    #[must_use]
    pub fn exec_registry(&self) -> &Arc<ExecRegistry> {
        &self.exec
    }

    /// Look up a live session owned by `user_id`.
    pub async fn session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Arc<Session>, GatewayError> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) if session.user_id == user_id => Ok(Arc::clone(session)),
            _ => Err(GatewayError::SessionNotFound),
        }
    }

    /// Consistent snapshot of the user's sessions.
    pub async fn list_sessions(&self, user_id: &str) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.info())
            .collect()
    }

    // ── Build ───────────────────────────────────────────────────────────────

    /// Open a new SSH session. Ordered build; every failure is final and
    /// leaves no partial state.
    pub async fn create_session(
        self: &Arc<Self>,
        user_id: &str,
        input: CreateSessionInput,
    ) -> Result<SessionInfo, GatewayError> {
        // 1. Parse the raw command if present.
        let parsed = input
            .command
            .as_deref()
            .map(parse_ssh_command)
            .transpose()?;
        let parsed = parsed.as_ref();

        // 2. Resolve the target: explicit input > saved host > parsed command.
        let saved = match input.host_id.as_deref() {
            Some(host_id) => Some(
                self.saved_hosts
                    .get(user_id, host_id)
                    .await?
                    .ok_or_else(|| GatewayError::UnknownSavedHost(host_id.to_string()))?,
            ),
            None => None,
        };

        let host = input
            .host
            .clone()
            .or_else(|| saved.as_ref().map(|h| h.host.clone()))
            .or_else(|| parsed.and_then(|c| c.host.clone()))
            .ok_or(GatewayError::MissingTarget)?;
        let username = input
            .username
            .clone()
            .or_else(|| saved.as_ref().map(|h| h.username.clone()))
            .or_else(|| parsed.and_then(|c| c.user.clone()))
            .ok_or(GatewayError::MissingTarget)?;
        let port = input
            .port
            .or_else(|| saved.as_ref().map(|h| h.port))
            .or_else(|| parsed.and_then(|c| c.port))
            .unwrap_or(22);

        // 3. Allow-list gate, before any network activity.
        if !self.config.is_host_allowed(&host) {
            return Err(GatewayError::HostNotAllowed);
        }

        // Validate every forward bind now — still no network activity.
        let local_specs = parsed.map(|c| c.local_forwards.clone()).unwrap_or_default();
        let remote_specs = parsed.map(|c| c.remote_forwards.clone()).unwrap_or_default();
        let dynamic_specs = parsed
            .map(|c| c.dynamic_forwards.clone())
            .unwrap_or_default();
        for spec in &local_specs {
            forward::normalize_bind_host(spec.bind_host.as_deref())?;
        }
        let remote_mappings = remote_specs
            .iter()
            .map(RemoteMapping::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        for spec in &dynamic_specs {
            forward::normalize_bind_host(spec.bind_host.as_deref())?;
        }

        // 4. Resolve vault secrets; explicit input fields win.
        let mut creds = CredentialInput {
            password: input.password.clone(),
            private_key: input.private_key.clone(),
            passphrase: input.passphrase.clone(),
        };
        let secret_id = input
            .secret_id
            .clone()
            .or_else(|| saved.as_ref().and_then(|h| h.secret_id.clone()));
        if let Some(secret_id) = secret_id {
            let token = input
                .vault_token
                .as_deref()
                .ok_or(GatewayError::VaultTokenRequired)?;
            let entry = self
                .vault
                .with_secrets(token, user_id, |s| s.get(&secret_id).cloned())
                .await?
                .ok_or_else(|| GatewayError::UnknownSecret(secret_id.clone()))?;
            creds = creds.or(CredentialInput {
                password: entry.password,
                private_key: entry.private_key,
                passphrase: entry.passphrase,
            });
        }

        // 5–6. Some credential must exist; an identity file can stand in for
        // a private key and is read only when needed.
        let identity_file = parsed.and_then(|c| c.identity_file.clone());
        if creds.password.is_none() && creds.private_key.is_none() && identity_file.is_none() {
            return Err(GatewayError::MissingCredentials);
        }
        if creds.private_key.is_none()
            && let Some(path) = identity_file
        {
            creds.private_key = Some(tokio::fs::read_to_string(&path).await?);
        }
        let auth = creds.into_auth_method();

        // 7. Open the transport with the trust-store verifier.
        let known_fingerprint = self.known_hosts.lookup(user_id, &host).await?;
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let transport::Transport {
            handle,
            fingerprint,
            first_use,
        } = transport::connect_transport(
            &host,
            port,
            &username,
            auth,
            known_fingerprint,
            std::time::Duration::from_secs(self.config.connect_timeout_secs),
            forwarded_tx,
        )
        .await?;

        // 8. First sighting is persisted only now, after full success.
        if first_use {
            self.known_hosts.record(user_id, &host, &fingerprint).await?;
        }

        let control = TransportControl::new(handle);

        // 9. Interactive shell.
        let cols = input.cols.unwrap_or(self.config.default_cols);
        let rows = input.rows.unwrap_or(self.config.default_rows);
        let shell = control.open_session().await?;
        shell
            .request_pty(false, &self.config.term, cols, rows, 0, 0, &[])
            .await?;
        shell.request_shell(true).await?;

        // 10. Register the session, then the dispatcher and forwarders.
        let session_id = uuid::Uuid::new_v4().to_string();
        let sockets = Arc::new(SocketSet::new());
        let (shell_tx, shell_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id: session_id.clone(),
            user_id: user_id.to_string(),
            host: host.clone(),
            port,
            username,
            created_at: time::now_millis(),
            connected: AtomicBool::new(true),
            transport: control.clone(),
            sockets: Arc::clone(&sockets),
            shell_tx,
            resources: Mutex::new(SessionResources::default()),
            sftp: SftpService::new(control.clone()),
        });
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::clone(&session));

        let dispatcher =
            forward::spawn_remote_dispatcher(forwarded_rx, remote_mappings, Arc::clone(&sockets));
        session.resources.lock().await.dispatcher = Some(dispatcher);

        // 11. Wire the shell before the forwarders so transport loss during
        // installation already routes through the idempotent close path.
        let pump = tokio::spawn(shell_pump(
            shell,
            shell_rx,
            Arc::clone(&session),
            Arc::downgrade(self),
        ));
        session.resources.lock().await.shell_task = Some(pump);

        // Install sequentially into local collections, then publish them
        // under one short lock; partial results still reach the teardown
        // path when a later install fails.
        let mut local_forwards = Vec::new();
        let mut installed_remote = Vec::new();
        let mut socks_servers = Vec::new();
        let installed: Result<(), GatewayError> = async {
            for spec in &local_specs {
                local_forwards.push(
                    forward::spawn_local_forward(control.clone(), Arc::clone(&sockets), spec)
                        .await?,
                );
            }
            for spec in &remote_specs {
                installed_remote
                    .push(forward::install_remote_forward(&control, &sockets, spec).await?);
            }
            for spec in &dynamic_specs {
                socks_servers.push(
                    socks::spawn_socks_server(control.clone(), Arc::clone(&sockets), spec)
                        .await?,
                );
            }
            Ok(())
        }
        .await;
        {
            let mut resources = session.resources.lock().await;
            resources.local_forwards = local_forwards;
            resources.remote_mappings = installed_remote;
            resources.socks_servers = socks_servers;
        }
        if let Err(e) = installed {
            warn!(session_id = %session_id, error = %e, "forwarder install failed, tearing down");
            session.connected.store(false, Ordering::SeqCst);
            self.teardown(&session, false).await?;
            return Err(e);
        }

        // 12. Durable connect audit before success is reported.
        if let Err(e) = self
            .audit
            .record(&AuditEvent::connect(user_id, &session_id, &host, port))
            .await
        {
            warn!(session_id = %session_id, error = %e, "connect audit failed, tearing down");
            session.connected.store(false, Ordering::SeqCst);
            self.teardown(&session, false).await?;
            return Err(e);
        }

        info!(
            session_id = %session_id,
            user_id = %user_id,
            host = %host,
            port,
            "session created"
        );
        Ok(session.info())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Close a session. Idempotent: concurrent and repeated calls collapse
    /// into one teardown and one disconnect audit event; closing an unknown
    /// id is a no-op.
    pub async fn close_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        let session = { self.sessions.read().await.get(session_id).cloned() };
        let Some(session) = session else {
            return Ok(());
        };
        if session.user_id != user_id {
            return Err(GatewayError::SessionNotFound);
        }
        if !session.connected.swap(false, Ordering::SeqCst) {
            // Another caller won the race; the teardown is theirs.
            return Ok(());
        }
        self.teardown(&session, true).await
    }

    /// The one teardown path. Order matters: sockets are told first, then
    /// listeners stop (no new channels during shutdown), remote forwards are
    /// cancelled, SFTP and the shell wind down, and only then does the
    /// transport drop.
    async fn teardown(
        &self,
        session: &Arc<Session>,
        write_audit: bool,
    ) -> Result<(), GatewayError> {
        session.sockets.send_all(&ServerFrame::Closed).await;
        session.sockets.close_all().await;

        // Drain under the lock, act after: nothing here may await the
        // network while the resource lock is held.
        let (local_forwards, socks_servers, remote_mappings, dispatcher, shell_task) = {
            let mut resources = session.resources.lock().await;
            (
                std::mem::take(&mut resources.local_forwards),
                std::mem::take(&mut resources.socks_servers),
                std::mem::take(&mut resources.remote_mappings),
                resources.dispatcher.take(),
                resources.shell_task.take(),
            )
        };
        // The pump is detached, never aborted: it exits on Close by itself
        // and may be the very task running this teardown.
        drop(shell_task);

        for forward in local_forwards {
            forward.shutdown();
        }
        for socks in socks_servers {
            socks.shutdown();
        }
        for mapping in remote_mappings {
            let _ = session
                .transport
                .cancel_tcpip_forward(&mapping.bind_host, u32::from(mapping.bind_port))
                .await;
        }
        if let Some(dispatcher) = dispatcher {
            dispatcher.abort();
        }

        session.sftp.shutdown().await;
        let _ = session.shell_tx.send(ShellCmd::Close);
        session.transport.disconnect().await;
        self.sessions.write().await.remove(&session.id);

        if write_audit {
            self.audit
                .record(&AuditEvent::disconnect(
                    &session.user_id,
                    &session.id,
                    &session.host,
                    session.port,
                ))
                .await?;
        }

        info!(session_id = %session.id, user_id = %session.user_id, "session closed");
        Ok(())
    }

    // ── Socket plumbing ─────────────────────────────────────────────────────

    /// Attach a socket; it immediately receives `{type:"ready"}`.
    pub async fn attach_socket(
        &self,
        user_id: &str,
        session_id: &str,
        socket: SessionSocket,
    ) -> Result<(), GatewayError> {
        let session = self.session(user_id, session_id).await?;
        socket.send(
            &ServerFrame::Ready {
                session_id: session.id.clone(),
            }
            .to_json(),
        );
        session.sockets.attach(socket).await;
        Ok(())
    }

    /// Detach a socket. Tolerant of unknown session and socket ids.
    pub async fn detach_socket(&self, user_id: &str, session_id: &str, socket_id: &str) {
        if let Ok(session) = self.session(user_id, session_id).await {
            session.sockets.detach(socket_id).await;
        }
    }

    /// Route one text frame from an attached socket: JSON control frames are
    /// interpreted, anything else goes to the shell verbatim (the paste
    /// path).
    pub async fn handle_socket_message(
        &self,
        user_id: &str,
        session_id: &str,
        raw: &str,
    ) -> Result<(), GatewayError> {
        let session = self.session(user_id, session_id).await?;
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(ClientFrame::Input { data }) => session.write_shell(data.into_bytes()),
            Ok(ClientFrame::Resize { cols, rows }) => session.resize_shell(cols, rows),
            Err(_) => {
                debug!(session_id = %session.id, "non-JSON frame written to shell verbatim");
                session.write_shell(raw.as_bytes().to_vec());
            },
        }
        Ok(())
    }

    /// Binary frames are not part of the session bus — only the
    /// interactive-exec sub-protocol carries binary, and it does so
    /// base64-encoded inside JSON. The outer layer reports the error back on
    /// the offending socket.
    pub async fn handle_socket_binary(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        self.session(user_id, session_id).await?;
        Err(GatewayError::BinaryFrameRejected)
    }

    pub async fn resize_session(
        &self,
        user_id: &str,
        session_id: &str,
        cols: u32,
        rows: u32,
    ) -> Result<(), GatewayError> {
        let session = self.session(user_id, session_id).await?;
        session.resize_shell(cols, rows);
        Ok(())
    }

    // ── Exec ────────────────────────────────────────────────────────────────

    /// One-shot exec on a session's transport with a deadline.
    pub async fn exec_command(
        &self,
        user_id: &str,
        session_id: &str,
        cmd: &str,
        timeout_ms: u64,
    ) -> Result<crate::exec::ExecResult, GatewayError> {
        let session = self.session(user_id, session_id).await?;
        crate::exec::exec_command(
            session.transport(),
            cmd,
            std::time::Duration::from_millis(timeout_ms),
        )
        .await
    }

    /// Streaming exec; `cancel` aborts the command and resolves with `-1`.
    pub async fn exec_stream(
        &self,
        user_id: &str,
        session_id: &str,
        cmd: &str,
        on_stdout: impl FnMut(&[u8]) + Send,
        on_stderr: impl FnMut(&[u8]) + Send,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<i32, GatewayError> {
        let session = self.session(user_id, session_id).await?;
        crate::exec::exec_stream(session.transport(), cmd, on_stdout, on_stderr, cancel).await
    }

    /// PTY exec bridged to a socket (container shells). Returns the opaque
    /// exec-session id for out-of-band input/resize.
    pub async fn attach_interactive_exec(
        &self,
        user_id: &str,
        session_id: &str,
        cmd: &str,
        socket: SessionSocket,
        cols: u32,
        rows: u32,
    ) -> Result<String, GatewayError> {
        let session = self.session(user_id, session_id).await?;
        crate::exec::attach_interactive_exec(
            Arc::clone(&self.exec),
            session.transport(),
            &self.config.term,
            cmd,
            socket,
            cols,
            rows,
        )
        .await
    }

    /// Route a frame arriving on an interactive-exec bridge.
    pub async fn handle_exec_message(&self, exec_id: &str, raw: &str) -> Result<(), GatewayError> {
        self.exec.handle_message(exec_id, raw).await
    }
}

// ── Shell pump ──────────────────────────────────────────────────────────────

/// Owns the shell channel: forwards its output to the bus and applies
/// control commands. When the shell or the transport ends on its own, the
/// session is closed through the idempotent path.
async fn shell_pump<S: Store + 'static>(
    mut shell: Channel<Msg>,
    mut rx: mpsc::UnboundedReceiver<ShellCmd>,
    session: Arc<Session>,
    gateway: Weak<Gateway<S>>,
) {
    let mut initiated_close = false;
    loop {
        tokio::select! {
            msg = shell.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    session
                        .sockets
                        .send_all(&ServerFrame::Output {
                            data: String::from_utf8_lossy(&data[..]).into_owned(),
                        })
                        .await;
                },
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    session
                        .sockets
                        .send_all(&ServerFrame::Output {
                            data: String::from_utf8_lossy(&data[..]).into_owned(),
                        })
                        .await;
                },
                Some(ChannelMsg::Close) => {
                    debug!(session_id = %session.id, "shell channel closed");
                    break;
                },
                None => {
                    if session.is_connected() {
                        session
                            .sockets
                            .send_all(&ServerFrame::Error {
                                message: "SSH transport closed unexpectedly".to_string(),
                            })
                            .await;
                    }
                    break;
                },
                Some(_) => {},
            },
            cmd = rx.recv() => match cmd {
                Some(ShellCmd::Data(bytes)) => {
                    if let Err(e) = shell.data(&bytes[..]).await {
                        warn!(session_id = %session.id, error = %e, "shell write failed");
                    }
                },
                Some(ShellCmd::Resize(cols, rows)) => {
                    let _ = shell.window_change(cols, rows, 0, 0).await;
                },
                Some(ShellCmd::Close) | None => {
                    // Teardown is already in flight elsewhere.
                    initiated_close = true;
                    let _ = shell.eof().await;
                    break;
                },
            },
        }
    }

    if !initiated_close
        && let Some(gateway) = gateway.upgrade()
    {
        let _ = gateway.close_session(&session.user_id, &session.id).await;
    }
}
