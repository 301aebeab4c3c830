//! Transport collaborators
//!
//! The protocol engine only needs "write bytes" and "read whatever is
//! available, waiting at most so long". Framing is never assumed here.
//!
//! - [`StreamTransport`]: byte streams (TCP, serial, connected UDP)
//! - [`DatagramTransport`]: connectionless sockets that report the sender

mod net;
#[cfg(feature = "serial")]
mod serial;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::TransportSettings;
use crate::error::{FieldbusError, Result};

pub use net::{connect_tcp, UdpTransport};
#[cfg(feature = "serial")]
pub use serial::open_serial;

/// Byte-stream transport
#[async_trait]
pub trait StreamTransport: Send {
    /// Write all bytes
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `max` bytes that are available within `wait`
    ///
    /// Returns an empty buffer when nothing arrived in time and
    /// [`FieldbusError::ConnectionClosed`] once the peer is gone. Must be
    /// cancel safe: dropping the future loses no bytes.
    async fn read_available(&mut self, max: usize, wait: Duration) -> Result<Vec<u8>>;

    /// Release the underlying handle
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: StreamTransport + ?Sized> StreamTransport for Box<T> {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data).await
    }

    async fn read_available(&mut self, max: usize, wait: Duration) -> Result<Vec<u8>> {
        (**self).read_available(max, wait).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Connectionless transport
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    async fn send_to(&self, data: &[u8], peer: SocketAddr) -> Result<()>;

    /// Next datagram and its sender, or `None` when nothing arrived within `wait`
    async fn receive_datagram(&self, wait: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>>;
}

/// [`StreamTransport`] over any tokio byte stream
#[derive(Debug)]
pub struct IoTransport<T> {
    io: T,
}

impl<T> IoTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: T) -> Self {
        Self { io }
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn into_inner(self) -> T {
        self.io
    }
}

#[async_trait]
impl<T> StreamTransport for IoTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn read_available(&mut self, max: usize, wait: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        match timeout(wait, self.io.read(&mut buf)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(FieldbusError::ConnectionClosed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            },
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

/// Open a client-side stream transport from parsed settings
pub async fn connect(settings: &TransportSettings, connect_timeout: Duration) -> Result<Box<dyn StreamTransport>> {
    match settings {
        TransportSettings::Tcp { host, port } => {
            Ok(Box::new(connect_tcp(host, *port, connect_timeout).await?))
        },
        TransportSettings::Udp { host, port } => {
            Ok(Box::new(UdpTransport::connect(host, *port).await?))
        },
        #[cfg(feature = "serial")]
        TransportSettings::Serial(serial) => Ok(Box::new(open_serial(serial)?)),
        #[cfg(not(feature = "serial"))]
        TransportSettings::Serial(serial) => Err(FieldbusError::config(format!(
            "Serial transport {} requires the `serial` feature",
            serial.device
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_io_transport_read_write() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = IoTransport::new(a);
        let mut right = IoTransport::new(b);

        left.write(&[0x01, 0x02, 0x03]).await.unwrap();
        let data = right
            .read_available(16, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(data, vec![0x01, 0x02, 0x03]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_transport_read_times_out_empty() {
        let (a, _b) = tokio::io::duplex(64);
        let mut transport = IoTransport::new(a);
        let data = transport
            .read_available(16, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_io_transport_peer_closed() {
        let (a, b) = tokio::io::duplex(64);
        let mut transport = IoTransport::new(a);
        drop(b);
        let err = transport
            .read_available(16, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, FieldbusError::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_boxed_transport_delegates() {
        let (a, b) = tokio::io::duplex(64);
        let mut boxed: Box<dyn StreamTransport> = Box::new(IoTransport::new(a));
        let mut peer = IoTransport::new(b);
        boxed.write(b"ping").await.unwrap();
        let data = peer.read_available(16, Duration::from_millis(100)).await.unwrap();
        assert_eq!(data, b"ping".to_vec());
        boxed.close().await.unwrap();
    }
}
