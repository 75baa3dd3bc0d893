//! Remote command execution over a session's transport.
//!
//! Three shapes: one-shot with a timeout, streaming with cancellation, and
//! PTY exec bridged to a socket (container shells). None of them touch the
//! session's interactive shell channel.

use std::{collections::HashMap, sync::Arc};

use {
    base64::Engine,
    russh::ChannelMsg,
    tokio::sync::{RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{
    bus::{ClientFrame, ServerFrame, SessionSocket},
    error::GatewayError,
    transport::TransportControl,
};

/// Outcome of a one-shot exec. `code` is `-1` when the remote never
/// reported an exit status.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Run a command, accumulate output, enforce a deadline.
///
/// On timeout the channel is abandoned (dropped) and the caller sees
/// [`GatewayError::CommandTimeout`].
pub async fn exec_command(
    transport: &TransportControl,
    cmd: &str,
    timeout: std::time::Duration,
) -> Result<ExecResult, GatewayError> {
    let mut channel = transport.open_session().await?;
    channel.exec(true, cmd).await?;

    let run = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut code = -1;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(&data[..]),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(&data[..]);
                },
                ChannelMsg::ExitStatus { exit_status } => code = exit_status as i32,
                ChannelMsg::Close => break,
                _ => {},
            }
        }
        (stdout, stderr, code)
    };

    match tokio::time::timeout(timeout, run).await {
        Ok((stdout, stderr, code)) => Ok(ExecResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            code,
        }),
        Err(_) => Err(GatewayError::CommandTimeout),
    }
}

/// Run a command, forwarding output as it arrives. Resolves with the exit
/// status, or `-1` if `cancel` fires first (the channel gets EOF'd).
pub async fn exec_stream(
    transport: &TransportControl,
    cmd: &str,
    mut on_stdout: impl FnMut(&[u8]) + Send,
    mut on_stderr: impl FnMut(&[u8]) + Send,
    cancel: CancellationToken,
) -> Result<i32, GatewayError> {
    let mut channel = transport.open_session().await?;
    channel.exec(true, cmd).await?;

    let mut code = -1;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = channel.eof().await;
                return Ok(-1);
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => on_stdout(&data[..]),
                Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                    on_stderr(&data[..]);
                },
                Some(ChannelMsg::ExitStatus { exit_status }) => code = exit_status as i32,
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {},
            },
        }
    }
    Ok(code)
}

// ── Interactive exec ────────────────────────────────────────────────────────

/// Out-of-band control for a PTY exec channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecControl {
    Input(Vec<u8>),
    Resize { cols: u32, rows: u32 },
    Close,
}

/// Process-wide table of live interactive exec channels, keyed by opaque id.
#[derive(Default)]
pub struct ExecRegistry {
    entries: RwLock<HashMap<String, mpsc::UnboundedSender<ExecControl>>>,
}

impl ExecRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, exec_id: &str, tx: mpsc::UnboundedSender<ExecControl>) {
        self.entries.write().await.insert(exec_id.to_string(), tx);
    }

    async fn remove(&self, exec_id: &str) {
        self.entries.write().await.remove(exec_id);
    }

    async fn send(&self, exec_id: &str, control: ExecControl) -> Result<(), GatewayError> {
        let entries = self.entries.read().await;
        let tx = entries
            .get(exec_id)
            .ok_or_else(|| GatewayError::ExecSessionNotFound(exec_id.to_string()))?;
        tx.send(control)
            .map_err(|_| GatewayError::ExecSessionNotFound(exec_id.to_string()))
    }

    pub async fn input(&self, exec_id: &str, data: &[u8]) -> Result<(), GatewayError> {
        self.send(exec_id, ExecControl::Input(data.to_vec())).await
    }

    pub async fn resize(&self, exec_id: &str, cols: u32, rows: u32) -> Result<(), GatewayError> {
        self.send(exec_id, ExecControl::Resize { cols, rows }).await
    }

    pub async fn close(&self, exec_id: &str) -> Result<(), GatewayError> {
        self.send(exec_id, ExecControl::Close).await
    }

    /// Route a text frame from the bridged socket: JSON control frames are
    /// interpreted, anything else is raw input.
    pub async fn handle_message(&self, exec_id: &str, raw: &str) -> Result<(), GatewayError> {
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(ClientFrame::Input { data }) => self.input(exec_id, data.as_bytes()).await,
            Ok(ClientFrame::Resize { cols, rows }) => self.resize(exec_id, cols, rows).await,
            Err(_) => self.input(exec_id, raw.as_bytes()).await,
        }
    }
}

/// Open an `exec` channel with a PTY and bridge it to a socket.
///
/// Output flows to the socket as `{type:"output", data:<base64>}`; control
/// arrives through [`ExecRegistry::handle_message`] under the returned id.
/// Channel close or error sends `{type:"closed"}` / `{type:"error"}` and
/// closes the socket.
pub async fn attach_interactive_exec(
    registry: Arc<ExecRegistry>,
    transport: &TransportControl,
    term: &str,
    cmd: &str,
    socket: SessionSocket,
    cols: u32,
    rows: u32,
) -> Result<String, GatewayError> {
    let mut channel = transport.open_session().await?;
    channel
        .request_pty(false, term, cols, rows, 0, 0, &[])
        .await?;
    channel.exec(true, cmd).await?;

    let exec_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<ExecControl>();
    registry.insert(&exec_id, tx).await;

    let task_id = exec_id.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        let frame = ServerFrame::Output {
                            data: base64::engine::general_purpose::STANDARD.encode(&data[..]),
                        };
                        if !socket.send(&frame.to_json()) {
                            break;
                        }
                    },
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!(exec_id = %task_id, exit_status, "interactive exec exited");
                    },
                    Some(ChannelMsg::Close) | None => {
                        socket.send(&ServerFrame::Closed.to_json());
                        socket.close();
                        break;
                    },
                    Some(_) => {},
                },
                ctrl = rx.recv() => match ctrl {
                    Some(ExecControl::Input(bytes)) => {
                        if let Err(e) = channel.data(&bytes[..]).await {
                            socket.send(
                                &ServerFrame::Error {
                                    message: format!("exec input failed: {e}"),
                                }
                                .to_json(),
                            );
                            socket.close();
                            break;
                        }
                    },
                    Some(ExecControl::Resize { cols, rows }) => {
                        let _ = channel.window_change(cols, rows, 0, 0).await;
                    },
                    Some(ExecControl::Close) | None => {
                        let _ = channel.eof().await;
                        socket.send(&ServerFrame::Closed.to_json());
                        socket.close();
                        break;
                    },
                },
            }
        }
        registry.remove(&task_id).await;
    });

    Ok(exec_id)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_routes_control_frames() {
        let registry = ExecRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.insert("e1", tx).await;

        registry
            .handle_message("e1", r#"{"type":"input","data":"ls\n"}"#)
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), ExecControl::Input(b"ls\n".to_vec()));

        registry
            .handle_message("e1", r#"{"type":"resize","cols":100,"rows":30}"#)
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), ExecControl::Resize {
            cols: 100,
            rows: 30
        });
    }

    #[tokio::test]
    async fn non_json_is_raw_input() {
        let registry = ExecRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.insert("e1", tx).await;

        registry.handle_message("e1", "plain paste").await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ExecControl::Input(b"plain paste".to_vec())
        );
    }

    #[tokio::test]
    async fn unknown_exec_id_errors() {
        let registry = ExecRegistry::new();
        let err = registry.input("missing", b"x").await.unwrap_err();
        assert!(matches!(err, GatewayError::ExecSessionNotFound(_)));
    }

    #[tokio::test]
    async fn removed_entry_errors() {
        let registry = ExecRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.insert("e1", tx).await;
        registry.remove("e1").await;

        assert!(registry.close("e1").await.is_err());
    }
}
