//! Client query engine
//!
//! One query = encode, then up to `retries` attempts of
//! write → poll until `latency + timeout` → decode. The transport stays locked
//! for the whole retry loop, so clients sharing one handle (several unit
//! addresses on one serial line) never interleave bytes.
//!
//! | Decode outcome | Effect |
//! |---|---|
//! | `Ack` | return |
//! | `Critical` with exception code | return, the responder answered |
//! | `Critical` integrity failure | next attempt |
//! | `Ignore` | next attempt |
//! | `Unknown` | keep polling until the deadline |
//!
//! When every attempt ends without a terminal outcome the query returns
//! `Critical` and leaves `exception_code` at 0.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bytes::ByteWriter;
use crate::command::Command;
use crate::constants::{timeouts, READ_CHUNK_SIZE};
use crate::error::{FieldbusError, Result};
use crate::frame::{CommResponse, Protocol};
use crate::transport::StreamTransport;

/// Retry and timing policy of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPolicy {
    /// Attempts per query
    pub retries: u32,
    /// Per-attempt response timeout
    pub timeout: Duration,
    /// Fixed allowance added to every attempt deadline
    pub latency: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            retries: timeouts::DEFAULT_RETRIES,
            timeout: timeouts::DEFAULT_TIMEOUT,
            latency: timeouts::DEFAULT_LATENCY,
        }
    }
}

impl QueryPolicy {
    /// Time one attempt may wait for its reply
    pub fn attempt_window(&self) -> Duration {
        self.latency + self.timeout
    }
}

/// Frame exchange context of one transaction
///
/// Pairs the command with its outgoing frame and the bytes received so far.
#[derive(Debug)]
pub struct Exchange<'a> {
    protocol: &'a Protocol,
    command: &'a mut Command,
    request: ByteWriter,
    response: ByteWriter,
    outcome: CommResponse,
}

impl<'a> Exchange<'a> {
    pub fn new(protocol: &'a Protocol, command: &'a mut Command) -> Self {
        Self {
            protocol,
            command,
            request: ByteWriter::new(),
            response: ByteWriter::new(),
            outcome: CommResponse::Unknown,
        }
    }

    /// Serialize the command into the outgoing frame
    pub fn encode(&mut self) -> Result<()> {
        self.request.clear();
        if self.protocol.client_encode(&*self.command, &mut self.request) {
            Ok(())
        } else {
            Err(FieldbusError::encode(format!(
                "Cannot encode FC{:02X} offset {} count {} ({} values)",
                self.command.function_code,
                self.command.offset,
                self.command.count,
                self.command.data.len()
            )))
        }
    }

    pub fn request(&self) -> &[u8] {
        self.request.as_slice()
    }

    pub fn response(&self) -> &[u8] {
        self.response.as_slice()
    }

    /// Append received bytes and decode everything accumulated so far
    pub fn feed(&mut self, chunk: &[u8]) -> CommResponse {
        self.response.write_bytes(chunk);
        self.outcome = self
            .protocol
            .client_decode(&mut *self.command, self.response.as_slice());
        self.outcome
    }

    /// Drop received bytes before a new attempt
    pub fn reset(&mut self) {
        self.response.clear();
        self.outcome = CommResponse::Unknown;
    }

    pub fn outcome(&self) -> CommResponse {
        self.outcome
    }

    pub fn command(&self) -> &Command {
        &*self.command
    }
}

/// Request/response driver over a shared stream transport
#[derive(Debug)]
pub struct Client<T> {
    transport: Arc<Mutex<T>>,
    protocol: Protocol,
    policy: QueryPolicy,
    next_transaction_id: AtomicU16,
}

impl<T: StreamTransport> Client<T> {
    pub fn new(transport: T, protocol: Protocol, policy: QueryPolicy) -> Self {
        Self::with_shared(Arc::new(Mutex::new(transport)), protocol, policy)
    }

    /// Client on a transport handle other clients may also use
    pub fn with_shared(transport: Arc<Mutex<T>>, protocol: Protocol, policy: QueryPolicy) -> Self {
        Self {
            transport,
            protocol,
            policy,
            next_transaction_id: AtomicU16::new(0),
        }
    }

    pub fn shared_transport(&self) -> Arc<Mutex<T>> {
        Arc::clone(&self.transport)
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn policy(&self) -> QueryPolicy {
        self.policy
    }

    /// Run one transaction
    ///
    /// Returns the final decode outcome. `Err` means the command could not be
    /// encoded or the transport failed.
    pub async fn query(&self, cmd: &mut Command) -> Result<CommResponse> {
        cmd.transaction_id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        cmd.exception_code = 0;
        cmd.query_length = 0;

        let mut exchange = Exchange::new(&self.protocol, cmd);
        exchange.encode()?;

        let mut transport = self.transport.lock().await;
        for attempt in 1..=self.policy.retries {
            exchange.reset();
            debug!(
                "TX[{}/{}] unit={} {}",
                attempt,
                self.policy.retries,
                self.protocol.address(),
                hex::encode(exchange.request())
            );
            transport.write(exchange.request()).await?;

            let deadline = Instant::now() + self.policy.attempt_window();
            loop {
                let now = Instant::now();
                if now >= deadline {
                    debug!("Attempt {} timed out", attempt);
                    break;
                }
                let chunk = transport
                    .read_available(READ_CHUNK_SIZE, deadline - now)
                    .await?;
                if chunk.is_empty() {
                    continue;
                }
                debug!("RX {}", hex::encode(&chunk));

                match exchange.feed(&chunk) {
                    CommResponse::Ack => {
                        debug!("Ack after {} attempt(s)", attempt);
                        return Ok(CommResponse::Ack);
                    },
                    CommResponse::Critical if exchange.command().is_exception() => {
                        debug!(
                            "Exception reply 0x{:02X}",
                            exchange.command().exception_code
                        );
                        return Ok(CommResponse::Critical);
                    },
                    CommResponse::Critical => {
                        warn!(
                            "Attempt {} rejected: {}",
                            attempt,
                            hex::encode(exchange.response())
                        );
                        break;
                    },
                    CommResponse::Ignore => {
                        debug!("Attempt {} got a frame for someone else", attempt);
                        break;
                    },
                    CommResponse::Unknown => {},
                }
            }
        }

        warn!(
            "No attempt was successful for FC{:02X} on unit {}",
            exchange.command().function_code,
            self.protocol.address()
        );
        Ok(CommResponse::Critical)
    }

    /// Query and map the outcome to a `Result`
    pub async fn execute(&self, mut cmd: Command) -> Result<Command> {
        match self.query(&mut cmd).await? {
            CommResponse::Ack => Ok(cmd),
            _ if cmd.is_exception() => Err(FieldbusError::Exception {
                function: cmd.function_code,
                code: cmd.exception_code,
            }),
            _ => Err(FieldbusError::NoResponse {
                attempts: self.policy.retries,
            }),
        }
    }

    pub async fn read_coils(&self, offset: u16, count: u16) -> Result<Vec<bool>> {
        Ok(self.execute(Command::read_coils(offset, count)).await?.bits())
    }

    pub async fn read_discrete_inputs(&self, offset: u16, count: u16) -> Result<Vec<bool>> {
        Ok(self
            .execute(Command::read_discrete_inputs(offset, count))
            .await?
            .bits())
    }

    pub async fn read_holding_registers(&self, offset: u16, count: u16) -> Result<Vec<u16>> {
        Ok(self
            .execute(Command::read_holding_registers(offset, count))
            .await?
            .data)
    }

    pub async fn read_input_registers(&self, offset: u16, count: u16) -> Result<Vec<u16>> {
        Ok(self
            .execute(Command::read_input_registers(offset, count))
            .await?
            .data)
    }

    pub async fn write_single_coil(&self, offset: u16, on: bool) -> Result<()> {
        self.execute(Command::write_single_coil(offset, on)).await?;
        Ok(())
    }

    pub async fn write_single_register(&self, offset: u16, value: u16) -> Result<()> {
        self.execute(Command::write_single_register(offset, value))
            .await?;
        Ok(())
    }

    pub async fn write_multiple_coils(&self, offset: u16, values: &[bool]) -> Result<()> {
        self.execute(Command::write_multiple_coils(offset, values))
            .await?;
        Ok(())
    }

    pub async fn write_multiple_registers(&self, offset: u16, values: &[u16]) -> Result<()> {
        self.execute(Command::write_multiple_registers(offset, values))
            .await?;
        Ok(())
    }

    /// Close the underlying transport
    pub async fn close(&self) -> Result<()> {
        self.transport.lock().await.close().await
    }
}
