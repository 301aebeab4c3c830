//! Datagram listener

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{serve_command, CommandHandler, ListenerHandle, ListenerOptions, SessionStats};
use crate::command::Command;
use crate::error::Result;
use crate::frame::{CommResponse, Protocol};
use crate::transport::DatagramTransport;

/// Connectionless session
///
/// Each datagram is one candidate frame; nothing carries over between
/// datagrams. Replies go back to the sender of the request.
pub struct DatagramListener<T> {
    transport: T,
    protocol: Protocol,
    handler: Arc<dyn CommandHandler>,
    options: ListenerOptions,
}

impl<T: DatagramTransport + 'static> DatagramListener<T> {
    pub fn new(transport: T, protocol: Protocol, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            transport,
            protocol,
            handler,
            options: ListenerOptions::datagram(),
        }
    }

    pub fn with_options(mut self, options: ListenerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn spawn(self) -> ListenerHandle {
        self.spawn_with_token(CancellationToken::new())
    }

    pub fn spawn_with_token(self, token: CancellationToken) -> ListenerHandle {
        let task = tokio::spawn(self.run(token.clone()));
        ListenerHandle::new(token, task)
    }

    /// Serve until cancelled or the socket fails
    pub async fn run(self, token: CancellationToken) -> Result<SessionStats> {
        info!(
            "Datagram listener started: unit {} ({} framing)",
            self.protocol.address(),
            self.protocol.framing()
        );
        let mut stats = SessionStats::default();

        loop {
            let received = tokio::select! {
                () = token.cancelled() => break,
                received = self.transport.receive_datagram(self.options.poll_interval) => received?,
            };
            let Some((datagram, peer)) = received else {
                continue;
            };
            stats.bytes_received += datagram.len() as u64;

            let mut cmd = Command::default();
            match self.protocol.server_decode(&mut cmd, &datagram) {
                CommResponse::Ack => {
                    debug!("RX {} {}", peer, hex::encode(&datagram));
                    let reply = serve_command(
                        &self.protocol,
                        self.handler.as_ref(),
                        &mut cmd,
                        &mut stats,
                    );
                    if !reply.is_empty() {
                        debug!("TX {} {}", peer, hex::encode(reply.as_slice()));
                        self.transport.send_to(reply.as_slice(), peer).await?;
                    }
                },
                outcome => {
                    debug!(
                        "Dropping datagram from {} ({}): {}",
                        peer,
                        outcome,
                        hex::encode(&datagram)
                    );
                    stats.frames_ignored += 1;
                },
            }
        }

        info!(
            "Datagram listener stopped: served={} ignored={} exceptions={}",
            stats.frames_served, stats.frames_ignored, stats.exceptions_sent
        );
        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::bytes::ByteWriter;
    use crate::transport::{StreamTransport, UdpTransport};
    use std::time::Duration;

    #[tokio::test]
    async fn test_reply_goes_to_sender() {
        let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let protocol = Protocol::stream(3);
        let handler: Arc<dyn CommandHandler> = Arc::new(|cmd: &mut Command| cmd.data.fill(1));
        let handle = DatagramListener::new(server, protocol.clone(), handler).spawn();

        let mut client = UdpTransport::connect("127.0.0.1", port).await.unwrap();
        let mut cmd = Command::read_coils(0, 3);
        cmd.transaction_id = 9;
        let mut request = ByteWriter::new();
        assert!(protocol.client_encode(&cmd, &mut request));
        client.write(request.as_slice()).await.unwrap();

        let reply = client
            .read_available(512, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(protocol.client_decode(&mut cmd, &reply), CommResponse::Ack);
        assert_eq!(cmd.data, vec![1, 1, 1]);

        let stats = handle.abort().await.unwrap();
        assert_eq!(stats.frames_served, 1);
    }

    #[tokio::test]
    async fn test_truncated_datagram_is_dropped() {
        let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let handler: Arc<dyn CommandHandler> = Arc::new(|_: &mut Command| {});
        let handle = DatagramListener::new(server, Protocol::stream(1), handler).spawn();

        let mut client = UdpTransport::connect("127.0.0.1", port).await.unwrap();
        // Header declares 6 bytes, only 2 follow
        client
            .write(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03])
            .await
            .unwrap();
        let reply = client
            .read_available(512, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(reply.is_empty());

        let stats = handle.abort().await.unwrap();
        assert_eq!(stats.frames_ignored, 1);
        assert_eq!(stats.frames_served, 0);
    }
}
