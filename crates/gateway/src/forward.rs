//! Local (`-L`) and remote (`-R`) forwarders.
//!
//! Local forwards bind a loopback TCP listener and turn each accepted
//! connection into a `direct-tcpip` channel. Remote forwards register
//! `tcpip-forward` requests with the peer and route the resulting inbound
//! channels through one dispatcher per session. Bind failures during session
//! build are fatal to the build; per-connection failures afterwards are
//! broadcast and logged but never end the session.

use std::{net::SocketAddr, sync::Arc};

use {
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

use gangway_ssh::command::{LocalForward, RemoteForward};

use crate::{
    bus::{ForwardMode, ServerFrame, SocketSet},
    error::GatewayError,
    transport::{ForwardedChannel, TransportControl},
};

// ── Bind rules ──────────────────────────────────────────────────────────────

/// Accepted loopback spellings. `localhost` and `::1` normalize to
/// `127.0.0.1`; anything routable is refused.
pub fn normalize_bind_host(bind: Option<&str>) -> Result<String, GatewayError> {
    let host = bind.unwrap_or("127.0.0.1");
    if host.eq_ignore_ascii_case("localhost") || host == "::1" {
        return Ok("127.0.0.1".to_string());
    }
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) if ip.is_loopback() => Ok(host.to_string()),
        _ => Err(GatewayError::NonLoopbackBind(host.to_string())),
    }
}

/// Whether a host string names loopback in any spelling.
#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

// ── Local forwards ──────────────────────────────────────────────────────────

/// A bound local forwarder. Aborting the task closes the listener.
pub struct LocalForwardHandle {
    pub bind_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl LocalForwardHandle {
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Bind the listener, announce the forward, and start the accept loop.
pub async fn spawn_local_forward(
    transport: TransportControl,
    sockets: Arc<SocketSet>,
    spec: &LocalForward,
) -> Result<LocalForwardHandle, GatewayError> {
    let bind_host = normalize_bind_host(spec.bind_host.as_deref())?;
    let listener = TcpListener::bind((bind_host.as_str(), spec.bind_port)).await?;
    let bind_addr = listener.local_addr()?;
    let target = (spec.target_host.clone(), spec.target_port);

    sockets
        .send_all(&ServerFrame::Forward {
            mode: ForwardMode::L,
            bind: bind_addr.to_string(),
            target: Some(format!("{}:{}", target.0, target.1)),
        })
        .await;
    debug!(bind = %bind_addr, target_host = %target.0, target_port = target.1, "local forward bound");

    let accept_target = target.clone();
    let task = tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "local forward accept failed");
                    break;
                },
            };
            let transport = transport.clone();
            let sockets = Arc::clone(&sockets);
            let (target_host, target_port) = accept_target.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    pipe_local(transport, stream, peer, &target_host, target_port).await
                {
                    debug!(error = %e, peer = %peer, "local forward connection ended with error");
                    sockets
                        .send_all(&ServerFrame::Error {
                            message: format!("local forward to {target_host}:{target_port} failed: {e}"),
                        })
                        .await;
                }
            });
        }
    });

    Ok(LocalForwardHandle { bind_addr, task })
}

async fn pipe_local(
    transport: TransportControl,
    mut stream: TcpStream,
    peer: SocketAddr,
    target_host: &str,
    target_port: u16,
) -> Result<(), GatewayError> {
    let channel = transport
        .open_direct_tcpip(
            target_host,
            u32::from(target_port),
            &peer.ip().to_string(),
            u32::from(peer.port()),
        )
        .await?;

    let mut channel_stream = channel.into_stream();
    tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await?;
    Ok(())
}

// ── Remote forwards ─────────────────────────────────────────────────────────

/// A declared remote mapping with its normalized bind host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMapping {
    pub bind_host: String,
    pub bind_port: u16,
    pub target_host: String,
    pub target_port: u16,
}

impl RemoteMapping {
    pub fn from_spec(spec: &RemoteForward) -> Result<Self, GatewayError> {
        Ok(Self {
            bind_host: normalize_bind_host(spec.bind_host.as_deref())?,
            bind_port: spec.bind_port,
            target_host: spec.target_host.clone(),
            target_port: spec.target_port,
        })
    }

    /// Whether an inbound channel's destination matches this mapping. A
    /// loopback bind matches any loopback spelling the peer reports.
    #[must_use]
    pub fn matches(&self, dest_host: &str, dest_port: u32) -> bool {
        u32::from(self.bind_port) == dest_port
            && (self.bind_host == dest_host
                || (is_loopback_host(&self.bind_host) && is_loopback_host(dest_host)))
    }
}

/// Register one remote forward with the peer and announce it.
pub async fn install_remote_forward(
    transport: &TransportControl,
    sockets: &SocketSet,
    spec: &RemoteForward,
) -> Result<RemoteMapping, GatewayError> {
    let mapping = RemoteMapping::from_spec(spec)?;
    transport
        .tcpip_forward(&mapping.bind_host, u32::from(mapping.bind_port))
        .await?;

    sockets
        .send_all(&ServerFrame::Forward {
            mode: ForwardMode::R,
            bind: format!("{}:{}", mapping.bind_host, mapping.bind_port),
            target: Some(format!("{}:{}", mapping.target_host, mapping.target_port)),
        })
        .await;
    debug!(
        bind_host = %mapping.bind_host,
        bind_port = mapping.bind_port,
        "remote forward registered"
    );
    Ok(mapping)
}

/// One dispatcher per session: route inbound forwarded channels to their
/// mapping's local target, reject the unmatched.
pub fn spawn_remote_dispatcher(
    mut rx: mpsc::UnboundedReceiver<ForwardedChannel>,
    mappings: Vec<RemoteMapping>,
    sockets: Arc<SocketSet>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(inbound) = rx.recv().await {
            let Some(mapping) = mappings
                .iter()
                .find(|m| m.matches(&inbound.connected_address, inbound.connected_port))
                .cloned()
            else {
                debug!(
                    dest_host = %inbound.connected_address,
                    dest_port = inbound.connected_port,
                    "rejecting forwarded channel with no matching mapping"
                );
                drop(inbound.channel);
                continue;
            };

            let sockets = Arc::clone(&sockets);
            tokio::spawn(async move {
                let target = format!("{}:{}", mapping.target_host, mapping.target_port);
                match TcpStream::connect((mapping.target_host.as_str(), mapping.target_port))
                    .await
                {
                    Ok(mut stream) => {
                        let mut channel_stream = inbound.channel.into_stream();
                        if let Err(e) =
                            tokio::io::copy_bidirectional(&mut channel_stream, &mut stream).await
                        {
                            debug!(error = %e, target = %target, "remote forward pipe ended with error");
                        }
                    },
                    Err(e) => {
                        debug!(error = %e, target = %target, "remote forward local dial failed");
                        sockets
                            .send_all(&ServerFrame::Error {
                                message: format!("remote forward dial to {target} failed: {e}"),
                            })
                            .await;
                        drop(inbound.channel);
                    },
                }
            });
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_spellings_normalize() {
        assert_eq!(normalize_bind_host(None).unwrap(), "127.0.0.1");
        assert_eq!(normalize_bind_host(Some("localhost")).unwrap(), "127.0.0.1");
        assert_eq!(normalize_bind_host(Some("LOCALHOST")).unwrap(), "127.0.0.1");
        assert_eq!(normalize_bind_host(Some("::1")).unwrap(), "127.0.0.1");
        assert_eq!(normalize_bind_host(Some("127.0.0.1")).unwrap(), "127.0.0.1");
        // Other 127/8 literals stay as given.
        assert_eq!(normalize_bind_host(Some("127.0.0.5")).unwrap(), "127.0.0.5");
    }

    #[test]
    fn routable_binds_are_refused() {
        for bad in ["0.0.0.0", "10.0.0.1", "192.168.1.5", "example.com", "::"] {
            assert!(
                matches!(
                    normalize_bind_host(Some(bad)),
                    Err(GatewayError::NonLoopbackBind(_))
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn mapping_matches_loopback_aliases() {
        let mapping = RemoteMapping {
            bind_host: "127.0.0.1".into(),
            bind_port: 9000,
            target_host: "127.0.0.1".into(),
            target_port: 3000,
        };

        assert!(mapping.matches("127.0.0.1", 9000));
        assert!(mapping.matches("localhost", 9000));
        assert!(mapping.matches("::1", 9000));
        assert!(!mapping.matches("127.0.0.1", 9001));
        assert!(!mapping.matches("10.0.0.9", 9000));
    }

    #[test]
    fn mapping_requires_loopback_bind() {
        let spec = RemoteForward {
            bind_host: Some("0.0.0.0".into()),
            bind_port: 9000,
            target_host: "127.0.0.1".into(),
            target_port: 3000,
        };
        assert!(matches!(
            RemoteMapping::from_spec(&spec),
            Err(GatewayError::NonLoopbackBind(_))
        ));
    }
}
