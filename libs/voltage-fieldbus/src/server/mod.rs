//! Server listeners
//!
//! A listener owns one transport and runs in its own task:
//!
//! ```text
//! ┌──────────────┐    ┌────────────┐    ┌─────────┐    ┌──────────────┐
//! │ poll bytes   │ →  │ accumulate │ →  │ decode  │ →  │ handler      │
//! │ (≤ interval) │    │            │    │ (frame) │    │ encode reply │
//! └──────────────┘    └────────────┘    └─────────┘    └──────────────┘
//! ```
//!
//! - [`StreamListener`]: TCP connections and serial lines
//! - [`DatagramListener`]: UDP, one datagram per frame
//!
//! Every listener stops through a [`CancellationToken`] checked on each poll,
//! and reports its [`SessionStats`] when joined.

mod datagram;
mod stream;

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bytes::ByteWriter;
use crate::command::Command;
use crate::constants::{timeouts, EXCEPTION_SERVER_DEVICE_FAILURE, MAX_ADDRESSED_ADU, MAX_STREAM_ADU};
use crate::error::{FieldbusError, Result};
use crate::frame::Protocol;

pub use datagram::DatagramListener;
pub use stream::StreamListener;

/// Application callback invoked once per decoded request
///
/// Reads must fill `data` (already sized to `count`); writes arrive with
/// `data` filled. A nonzero `exception_code` turns the reply into an
/// exception reply.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, cmd: &mut Command);
}

impl<F> CommandHandler for F
where
    F: Fn(&mut Command) + Send + Sync + 'static,
{
    fn handle(&self, cmd: &mut Command) {
        self(cmd)
    }
}

/// Listener session tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Upper bound of one read; the cancellation token is checked in between
    pub poll_interval: Duration,
    /// Close the session after this long without a served frame
    pub idle_timeout: Option<Duration>,
    /// Drop a partial frame after this much line silence
    pub frame_gap: Option<Duration>,
    /// Accumulator size that can no longer become a valid frame
    pub max_frame: usize,
}

impl ListenerOptions {
    /// Connection-oriented sessions
    pub fn stream() -> Self {
        Self {
            poll_interval: timeouts::DEFAULT_POLL_INTERVAL,
            idle_timeout: Some(timeouts::DEFAULT_IDLE_TIMEOUT),
            frame_gap: None,
            max_frame: MAX_STREAM_ADU,
        }
    }

    /// Serial lines: no idle timeout, partial frames expire after a gap
    pub fn serial() -> Self {
        Self {
            poll_interval: timeouts::DEFAULT_POLL_INTERVAL,
            idle_timeout: None,
            frame_gap: Some(timeouts::DEFAULT_FRAME_GAP),
            max_frame: MAX_ADDRESSED_ADU,
        }
    }

    /// Connectionless endpoints
    pub fn datagram() -> Self {
        Self {
            poll_interval: timeouts::DEFAULT_POLL_INTERVAL,
            idle_timeout: None,
            frame_gap: None,
            max_frame: MAX_STREAM_ADU,
        }
    }
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self::stream()
    }
}

/// Counters of one listener session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Replies sent, exception replies included
    pub frames_served: u64,
    /// Frames dropped as foreign or malformed
    pub frames_ignored: u64,
    /// Exception replies sent
    pub exceptions_sent: u64,
    pub bytes_received: u64,
}

/// Running listener task
#[derive(Debug)]
pub struct ListenerHandle {
    token: CancellationToken,
    task: JoinHandle<Result<SessionStats>>,
}

impl ListenerHandle {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<Result<SessionStats>>) -> Self {
        Self { token, task }
    }

    /// Token that stops this listener when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request a stop and wait for the session to end
    pub async fn abort(self) -> Result<SessionStats> {
        self.token.cancel();
        self.join().await
    }

    /// Wait for the session to end on its own
    pub async fn join(self) -> Result<SessionStats> {
        self.task
            .await
            .map_err(|e| FieldbusError::internal(format!("Listener task failed: {e}")))?
    }
}

/// Dispatch a decoded request and build the reply
///
/// The handler is skipped when decoding already flagged an exception. A reply
/// that cannot be encoded becomes a device failure exception. An empty reply
/// means nothing should be sent.
pub(crate) fn serve_command(
    protocol: &Protocol,
    handler: &dyn CommandHandler,
    cmd: &mut Command,
    stats: &mut SessionStats,
) -> ByteWriter {
    if !cmd.is_exception() {
        handler.handle(cmd);
    }

    let mut reply = ByteWriter::new();
    if !protocol.server_encode(cmd, &mut reply) {
        debug!(
            "Reply to FC{:02X} not encodable ({} values for count {})",
            cmd.function_code,
            cmd.data.len(),
            cmd.count
        );
        cmd.set_exception(EXCEPTION_SERVER_DEVICE_FAILURE);
        reply.clear();
        let encoded = protocol.server_encode(cmd, &mut reply);
        debug_assert!(encoded, "exception replies always fit a frame");
        if !encoded {
            warn!(
                "Device failure reply to FC{:02X} not encodable, sending nothing",
                cmd.function_code
            );
            reply.clear();
        }
    }

    stats.frames_served += 1;
    if cmd.is_exception() {
        stats.exceptions_sent += 1;
    }
    reply
}
