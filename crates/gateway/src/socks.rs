//! Dynamic (`-D`) forwarding: a minimal SOCKS5 server on a loopback bind.
//!
//! No authentication, CONNECT only. Each accepted request resolves to a
//! `direct-tcpip` channel parameterized by the SOCKS destination, then pipes
//! both ways until either side closes.

use std::{net::SocketAddr, sync::Arc};

use {
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

use gangway_ssh::command::DynamicForward;

use crate::{
    bus::{ForwardMode, ServerFrame, SocketSet},
    error::GatewayError,
    forward::normalize_bind_host,
    transport::TransportControl,
};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCESS: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_COMMAND_UNSUPPORTED: u8 = 0x07;

/// A running SOCKS server. Aborting the task closes the listener.
pub struct SocksHandle {
    pub bind_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl SocksHandle {
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

/// Bind the SOCKS listener, announce it, and start serving.
pub async fn spawn_socks_server(
    transport: TransportControl,
    sockets: Arc<SocketSet>,
    spec: &DynamicForward,
) -> Result<SocksHandle, GatewayError> {
    let bind_host = normalize_bind_host(spec.bind_host.as_deref())?;
    let listener = TcpListener::bind((bind_host.as_str(), spec.bind_port)).await?;
    let bind_addr = listener.local_addr()?;

    sockets
        .send_all(&ServerFrame::Forward {
            mode: ForwardMode::D,
            bind: bind_addr.to_string(),
            target: None,
        })
        .await;
    debug!(bind = %bind_addr, "socks server bound");

    let task = tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "socks accept failed");
                    break;
                },
            };
            let transport = transport.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(transport, stream, peer).await {
                    debug!(error = %e, peer = %peer, "socks connection ended with error");
                }
            });
        }
    });

    Ok(SocksHandle { bind_addr, task })
}

async fn serve_connection(
    transport: TransportControl,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), GatewayError> {
    negotiate_method(&mut stream).await?;

    let (dest_host, dest_port) = match read_request(&mut stream).await {
        Ok(dest) => dest,
        Err(e) => {
            write_reply(&mut stream, REPLY_COMMAND_UNSUPPORTED).await.ok();
            return Err(e);
        },
    };

    let channel = match transport
        .open_direct_tcpip(
            &dest_host,
            u32::from(dest_port),
            &peer.ip().to_string(),
            u32::from(peer.port()),
        )
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            write_reply(&mut stream, REPLY_GENERAL_FAILURE).await.ok();
            return Err(e.into());
        },
    };

    write_reply(&mut stream, REPLY_SUCCESS).await?;

    let mut channel_stream = channel.into_stream();
    tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await?;
    Ok(())
}

/// Greeting: `[ver, nmethods, methods…]` → `[ver, method]`.
async fn negotiate_method<S>(stream: &mut S) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unsupported socks version {}", header[0]),
        )));
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
    Ok(())
}

/// Request: `[ver, cmd, rsv, atyp, addr…, port]` → destination.
async fn read_request<S>(stream: &mut S) -> Result<(String, u16), GatewayError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION || header[1] != CMD_CONNECT {
        return Err(GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unsupported socks command {}", header[1]),
        )));
    }

    let host = match header[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv4Addr::from(addr).to_string()
        },
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name).map_err(|_| {
                GatewayError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "socks domain is not utf-8",
                ))
            })?
        },
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            std::net::Ipv6Addr::from(addr).to_string()
        },
        other => {
            return Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported socks address type {other}"),
            )));
        },
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok((host, u16::from_be_bytes(port)))
}

/// `[ver, reply, rsv, atyp=IPv4, 0.0.0.0, 0]`. The bound-address fields are
/// not meaningful for a tunneled connect, so they are zeroed.
async fn write_reply<S>(stream: &mut S, reply: u8) -> Result<(), GatewayError>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, reply, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn method_negotiation_picks_no_auth() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();

        negotiate_method(&mut server).await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn wrong_version_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        assert!(negotiate_method(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn request_parses_ipv4() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 9, 0x00, 0x50])
            .await
            .unwrap();

        let (host, port) = read_request(&mut server).await.unwrap();
        assert_eq!(host, "10.0.0.9");
        assert_eq!(port, 80);
    }

    #[tokio::test]
    async fn request_parses_domain() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut bytes = vec![0x05, 0x01, 0x00, 0x03, 11];
        bytes.extend_from_slice(b"db.internal");
        bytes.extend_from_slice(&5432u16.to_be_bytes());
        client.write_all(&bytes).await.unwrap();

        let (host, port) = read_request(&mut server).await.unwrap();
        assert_eq!(host, "db.internal");
        assert_eq!(port, 5432);
    }

    #[tokio::test]
    async fn request_parses_ipv6() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut bytes = vec![0x05, 0x01, 0x00, 0x04];
        bytes.extend_from_slice(&std::net::Ipv6Addr::LOCALHOST.octets());
        bytes.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&bytes).await.unwrap();

        let (host, port) = read_request(&mut server).await.unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 443);
    }

    #[tokio::test]
    async fn bind_command_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        assert!(read_request(&mut server).await.is_err());
    }
}
