//! Socket transports

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{DatagramTransport, IoTransport, StreamTransport};
use crate::constants::MAX_STREAM_ADU;
use crate::error::{FieldbusError, Result};

/// Connect a TCP stream within `connect_timeout`
pub async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<IoTransport<TcpStream>> {
    let addr = format!("{host}:{port}");
    debug!("TCP connecting: {}", addr);

    match timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("TCP_NODELAY: {}", e);
            }
            info!("TCP connected: {}", addr);
            Ok(IoTransport::new(stream))
        },
        Ok(Err(e)) => {
            error!("TCP err: {} - {}", addr, e);
            Err(FieldbusError::io(format!("Failed to connect to {addr}: {e}")))
        },
        Err(_) => {
            warn!("TCP timeout: {}", addr);
            Err(FieldbusError::timeout(format!("Connection to {addr} timed out")))
        },
    }
}

/// UDP socket usable both as a connected stream and as a datagram endpoint
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a listening socket
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("UDP bound: {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    /// Bind an ephemeral socket and fix its peer to `host:port`
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let peer = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| FieldbusError::config(format!("Cannot resolve {host}:{port}")))?;
        let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        info!("UDP peer: {}", peer);
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl StreamTransport for UdpTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.socket.send(data).await?;
        Ok(())
    }

    async fn read_available(&mut self, max: usize, wait: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        match timeout(wait, self.socket.recv(&mut buf)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            },
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send_to(&self, data: &[u8], peer: SocketAddr) -> Result<()> {
        self.socket.send_to(data, peer).await?;
        Ok(())
    }

    /// Datagrams longer than [`MAX_STREAM_ADU`] are dropped here
    async fn receive_datagram(&self, wait: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        // One spare byte tells an oversized datagram from a full-size frame
        let mut buf = [0u8; MAX_STREAM_ADU + 1];
        match timeout(wait, self.socket.recv_from(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok((n, peer))) if n > MAX_STREAM_ADU => {
                debug!("Dropping oversized datagram from {} (>{} bytes)", peer, MAX_STREAM_ADU);
                Ok(None)
            },
            Ok(Ok((n, peer))) => Ok(Some((buf[..n].to_vec(), peer))),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}
