//! The session bus: single-line JSON frames over attached sockets.
//!
//! A socket here is the sending half of an unbounded channel; the outer
//! layer's write loop drains it into a real WebSocket. Broadcast serializes
//! each frame once, and a socket whose channel is gone is closed and removed
//! without disturbing the other recipients. Per-socket ordering is the
//! channel's FIFO ordering.

use {
    serde::{Deserialize, Serialize},
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, warn},
};

// ── Frames ──────────────────────────────────────────────────────────────────

/// Which forwarder announced itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardMode {
    L,
    R,
    D,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Ready {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Output {
        data: String,
    },
    Closed,
    Error {
        message: String,
    },
    Forward {
        mode: ForwardMode,
        bind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

impl ServerFrame {
    /// Serialize to the single-line wire form. These enums cannot fail to
    /// serialize; a failure is logged and yields an empty frame that
    /// receivers ignore.
    #[must_use]
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize bus frame: {e}");
                String::new()
            },
        }
    }
}

/// Client → server control frames. Anything that fails to parse as this is
/// treated as raw shell input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Input { data: String },
    Resize { cols: u32, rows: u32 },
}

// ── Sockets ─────────────────────────────────────────────────────────────────

/// What the outer write loop receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketMessage {
    /// A serialized frame to write as one text message.
    Frame(String),
    /// Close the underlying WebSocket and end the write loop.
    Close,
}

/// An attached socket: an id plus the channel feeding its write loop.
#[derive(Debug, Clone)]
pub struct SessionSocket {
    pub id: String,
    tx: mpsc::UnboundedSender<SocketMessage>,
}

impl SessionSocket {
    #[must_use]
    pub fn new(id: impl Into<String>, tx: mpsc::UnboundedSender<SocketMessage>) -> Self {
        Self { id: id.into(), tx }
    }

    /// Queue a serialized frame. `false` means the receiver is gone.
    pub fn send(&self, json: &str) -> bool {
        self.tx.send(SocketMessage::Frame(json.to_string())).is_ok()
    }

    /// Ask the write loop to close the socket.
    pub fn close(&self) {
        let _ = self.tx.send(SocketMessage::Close);
    }
}

/// The set of sockets attached to one session.
#[derive(Default)]
pub struct SocketSet {
    sockets: Mutex<Vec<SessionSocket>>,
}

impl SocketSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, socket: SessionSocket) {
        self.sockets.lock().await.push(socket);
    }

    /// Remove a socket by id. Unknown ids are tolerated.
    pub async fn detach(&self, socket_id: &str) {
        self.sockets.lock().await.retain(|s| s.id != socket_id);
    }

    pub async fn len(&self) -> usize {
        self.sockets.lock().await.len()
    }

    /// Serialize once and fan out. A socket whose send fails is closed and
    /// dropped from the set; the rest are unaffected.
    pub async fn send_all(&self, frame: &ServerFrame) {
        let json = frame.to_json();
        if json.is_empty() {
            return;
        }
        let mut sockets = self.sockets.lock().await;
        sockets.retain(|socket| {
            let ok = socket.send(&json);
            if !ok {
                debug!(socket_id = %socket.id, "dropping dead session socket");
                socket.close();
            }
            ok
        });
    }

    /// Close every socket and clear the set.
    pub async fn close_all(&self) {
        let mut sockets = self.sockets.lock().await;
        for socket in sockets.drain(..) {
            socket.close();
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn socket(id: &str) -> (SessionSocket, mpsc::UnboundedReceiver<SocketMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionSocket::new(id, tx), rx)
    }

    #[test]
    fn server_frames_serialize_to_wire_shape() {
        assert_eq!(
            ServerFrame::Ready {
                session_id: "s1".into()
            }
            .to_json(),
            r#"{"type":"ready","sessionId":"s1"}"#
        );
        assert_eq!(
            ServerFrame::Output { data: "hi".into() }.to_json(),
            r#"{"type":"output","data":"hi"}"#
        );
        assert_eq!(ServerFrame::Closed.to_json(), r#"{"type":"closed"}"#);
        assert_eq!(
            ServerFrame::Forward {
                mode: ForwardMode::L,
                bind: "127.0.0.1:7000".into(),
                target: Some("10.0.0.9:80".into()),
            }
            .to_json(),
            r#"{"type":"forward","mode":"L","bind":"127.0.0.1:7000","target":"10.0.0.9:80"}"#
        );
        assert_eq!(
            ServerFrame::Forward {
                mode: ForwardMode::D,
                bind: "127.0.0.1:1080".into(),
                target: None,
            }
            .to_json(),
            r#"{"type":"forward","mode":"D","bind":"127.0.0.1:1080"}"#
        );
    }

    #[test]
    fn client_frames_parse() {
        let input: ClientFrame = serde_json::from_str(r#"{"type":"input","data":"ls\n"}"#).unwrap();
        assert_eq!(input, ClientFrame::Input { data: "ls\n".into() });

        let resize: ClientFrame =
            serde_json::from_str(r#"{"type":"resize","cols":80,"rows":24}"#).unwrap();
        assert_eq!(resize, ClientFrame::Resize { cols: 80, rows: 24 });

        assert!(serde_json::from_str::<ClientFrame>("plain paste text").is_err());
    }

    #[tokio::test]
    async fn send_all_reaches_every_socket_in_order() {
        let set = SocketSet::new();
        let (s1, mut rx1) = socket("a");
        let (s2, mut rx2) = socket("b");
        set.attach(s1).await;
        set.attach(s2).await;

        for i in 0..3 {
            set.send_all(&ServerFrame::Output {
                data: format!("chunk{i}"),
            })
            .await;
        }

        for rx in [&mut rx1, &mut rx2] {
            for i in 0..3 {
                let msg = rx.try_recv().unwrap();
                assert_eq!(
                    msg,
                    SocketMessage::Frame(
                        ServerFrame::Output {
                            data: format!("chunk{i}")
                        }
                        .to_json()
                    )
                );
            }
        }
    }

    #[tokio::test]
    async fn dead_socket_is_removed_others_unaffected() {
        let set = SocketSet::new();
        let (s1, rx1) = socket("dead");
        let (s2, mut rx2) = socket("live");
        set.attach(s1).await;
        set.attach(s2).await;

        drop(rx1); // receiver gone → send fails
        set.send_all(&ServerFrame::Closed).await;

        assert_eq!(set.len().await, 1);
        assert!(matches!(rx2.try_recv().unwrap(), SocketMessage::Frame(_)));
    }

    #[tokio::test]
    async fn detach_tolerates_unknown_ids() {
        let set = SocketSet::new();
        let (s1, _rx1) = socket("a");
        set.attach(s1).await;

        set.detach("nonexistent").await;
        assert_eq!(set.len().await, 1);
        set.detach("a").await;
        assert_eq!(set.len().await, 0);
    }

    #[tokio::test]
    async fn close_all_signals_each_socket() {
        let set = SocketSet::new();
        let (s1, mut rx1) = socket("a");
        set.attach(s1).await;

        set.close_all().await;
        assert_eq!(rx1.try_recv().unwrap(), SocketMessage::Close);
        assert_eq!(set.len().await, 0);
    }
}
