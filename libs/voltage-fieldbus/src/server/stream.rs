//! Stream and serial listener

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{serve_command, CommandHandler, ListenerHandle, ListenerOptions, SessionStats};
use crate::bytes::ByteWriter;
use crate::command::Command;
use crate::constants::READ_CHUNK_SIZE;
use crate::error::{FieldbusError, Result};
use crate::frame::{CommResponse, Protocol};
use crate::transport::StreamTransport;

/// Session over a byte stream
///
/// Bytes accumulate until a frame decodes. After an `Ack` only the served
/// frame is removed, so pipelined requests are answered in order. `Ignore`
/// drops the whole accumulator.
pub struct StreamListener<T> {
    transport: T,
    protocol: Protocol,
    handler: Arc<dyn CommandHandler>,
    options: ListenerOptions,
}

/// Session state that lives for one `run`
struct Session {
    accumulator: ByteWriter,
    stats: SessionStats,
    last_served: Instant,
    last_received: Instant,
}

impl<T: StreamTransport + 'static> StreamListener<T> {
    /// Connection session with idle timeout
    pub fn new(transport: T, protocol: Protocol, handler: Arc<dyn CommandHandler>) -> Self {
        let mut options = ListenerOptions::stream();
        options.max_frame = protocol.framing().max_frame();
        Self {
            transport,
            protocol,
            handler,
            options,
        }
    }

    /// Serial line session: no idle timeout, partial frames expire
    pub fn serial(transport: T, protocol: Protocol, handler: Arc<dyn CommandHandler>) -> Self {
        let mut options = ListenerOptions::serial();
        options.max_frame = protocol.framing().max_frame();
        Self {
            transport,
            protocol,
            handler,
            options,
        }
    }

    pub fn with_options(mut self, options: ListenerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Run in a new task
    pub fn spawn(self) -> ListenerHandle {
        self.spawn_with_token(CancellationToken::new())
    }

    /// Run in a new task, stopping when `token` is cancelled
    pub fn spawn_with_token(self, token: CancellationToken) -> ListenerHandle {
        let task = tokio::spawn(self.run(token.clone()));
        ListenerHandle::new(token, task)
    }

    /// Serve until cancelled, idle, or the peer goes away
    pub async fn run(mut self, token: CancellationToken) -> Result<SessionStats> {
        info!(
            "Session started: unit {} ({} framing)",
            self.protocol.address(),
            self.protocol.framing()
        );

        let now = Instant::now();
        let mut session = Session {
            accumulator: ByteWriter::new(),
            stats: SessionStats::default(),
            last_served: now,
            last_received: now,
        };

        let result = self.serve(&mut session, &token).await;

        if let Err(e) = self.transport.close().await {
            debug!("Close after session: {}", e);
        }
        let stats = session.stats;
        info!(
            "Session ended: served={} ignored={} exceptions={} rx={}B",
            stats.frames_served, stats.frames_ignored, stats.exceptions_sent, stats.bytes_received
        );
        result.map(|()| stats)
    }

    async fn serve(&mut self, session: &mut Session, token: &CancellationToken) -> Result<()> {
        loop {
            self.drain(session).await?;

            if let Some(idle) = self.options.idle_timeout {
                if session.last_served.elapsed() >= idle {
                    info!("Session idle for {:?}, closing", idle);
                    return Ok(());
                }
            }
            if let Some(gap) = self.options.frame_gap {
                if !session.accumulator.is_empty() && session.last_received.elapsed() >= gap {
                    warn!(
                        "Dropping partial frame after {:?} of silence: {}",
                        gap,
                        hex::encode(session.accumulator.as_slice())
                    );
                    session.accumulator.clear();
                    session.stats.frames_ignored += 1;
                }
            }

            let read = tokio::select! {
                () = token.cancelled() => {
                    debug!("Session cancelled");
                    return Ok(());
                }
                read = self.transport.read_available(READ_CHUNK_SIZE, self.options.poll_interval) => read,
            };

            match read {
                Ok(chunk) if chunk.is_empty() => {},
                Ok(chunk) => {
                    session.stats.bytes_received += chunk.len() as u64;
                    session.last_received = Instant::now();
                    session.accumulator.write_bytes(&chunk);
                },
                Err(FieldbusError::ConnectionClosed) => {
                    info!("Peer closed the session");
                    return Ok(());
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Serve every complete frame in the accumulator
    async fn drain(&mut self, session: &mut Session) -> Result<()> {
        while !session.accumulator.is_empty() {
            let mut cmd = Command::default();
            match self
                .protocol
                .server_decode(&mut cmd, session.accumulator.as_slice())
            {
                CommResponse::Unknown => {
                    if session.accumulator.len() > self.options.max_frame {
                        warn!(
                            "Discarding {} bytes that never formed a frame",
                            session.accumulator.len()
                        );
                        session.accumulator.clear();
                        session.stats.frames_ignored += 1;
                    }
                    return Ok(());
                },
                CommResponse::Ignore | CommResponse::Critical => {
                    debug!(
                        "Ignoring {}",
                        hex::encode(session.accumulator.as_slice())
                    );
                    session.accumulator.clear();
                    session.stats.frames_ignored += 1;
                    return Ok(());
                },
                CommResponse::Ack => {
                    let frame_len = cmd.query_length.min(session.accumulator.len());
                    debug!(
                        "RX {}",
                        hex::encode(&session.accumulator.as_slice()[..frame_len])
                    );
                    session.accumulator.consume(frame_len);

                    let reply = serve_command(
                        &self.protocol,
                        self.handler.as_ref(),
                        &mut cmd,
                        &mut session.stats,
                    );
                    if !reply.is_empty() {
                        debug!("TX {}", hex::encode(reply.as_slice()));
                        self.transport.write(reply.as_slice()).await?;
                    }
                    session.last_served = Instant::now();
                },
            }
        }
        Ok(())
    }
}
