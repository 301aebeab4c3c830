//! Frame codecs
//!
//! A [`FrameCodec`] wraps the per-function body in a framing variant's header
//! and trailer. Two variants exist:
//!
//! - [`StreamFraming`]: transaction id, protocol id and length prefix, no CRC
//! - [`AddressedFraming`]: address byte and trailing CRC-16, no length field
//!
//! Decoding reports a [`CommResponse`] instead of an error. Callers keep
//! accumulating on `Unknown`, drop the buffer on `Ignore`, and act on `Ack`.

mod addressed;
mod stream;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bytes::ByteWriter;
use crate::command::Command;
use crate::constants::{MAX_ADDRESSED_ADU, MAX_STREAM_ADU};
use crate::error::FieldbusError;
use crate::function::FunctionTable;

pub use addressed::AddressedFraming;
pub use stream::StreamFraming;

/// Frame-level decode outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommResponse {
    /// Not enough bytes yet, or integrity not yet evaluable
    #[default]
    Unknown,
    /// Well-formed but not addressed to us
    Ignore,
    /// Integrity failure, or an exception reply was decoded
    Critical,
    /// Full valid frame decoded
    Ack,
}

impl CommResponse {
    /// Ack and Critical end a client attempt
    pub fn is_terminal(self) -> bool {
        matches!(self, CommResponse::Ack | CommResponse::Critical)
    }
}

impl fmt::Display for CommResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommResponse::Unknown => "unknown",
            CommResponse::Ignore => "ignore",
            CommResponse::Critical => "critical",
            CommResponse::Ack => "ack",
        };
        f.write_str(name)
    }
}

/// Framing variant contract
///
/// `address` is the unit address of the exchange: the target device for the
/// client operations, this device for the server operations.
pub trait FrameCodec: Send + Sync + fmt::Debug {
    fn framing(&self) -> Framing;

    /// Serialize a request; `false` if the command cannot be encoded
    fn client_encode(&self, address: u8, cmd: &Command, frame: &mut ByteWriter) -> bool;

    /// Decode a reply to `cmd` from the accumulated bytes
    fn client_decode(&self, address: u8, cmd: &mut Command, frame: &[u8]) -> CommResponse;

    /// Serialize the reply to a served command, taking the exception path when
    /// `exception_code` is set
    fn server_encode(&self, address: u8, cmd: &Command, frame: &mut ByteWriter) -> bool;

    /// Decode a request from the accumulated bytes into `cmd`
    ///
    /// Never returns `Critical`: frames failing integrity checks are `Ignore`.
    fn server_decode(&self, address: u8, cmd: &mut Command, frame: &[u8]) -> CommResponse;
}

/// Framing variant selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Length-prefixed framing used on sockets
    #[default]
    #[serde(alias = "tcp")]
    Stream,
    /// Address + CRC framing used on serial lines
    #[serde(alias = "rtu")]
    Addressed,
}

impl Framing {
    /// Frame codec for this variant over the given function table
    pub fn codec(self, functions: Arc<FunctionTable>) -> Arc<dyn FrameCodec> {
        match self {
            Framing::Stream => Arc::new(StreamFraming::new(functions)),
            Framing::Addressed => Arc::new(AddressedFraming::new(functions)),
        }
    }

    /// Largest well-formed frame
    pub fn max_frame(self) -> usize {
        match self {
            Framing::Stream => MAX_STREAM_ADU,
            Framing::Addressed => MAX_ADDRESSED_ADU,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Framing::Stream => "stream",
            Framing::Addressed => "addressed",
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framing {
    type Err = FieldbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "tcp" => Ok(Framing::Stream),
            "addressed" | "rtu" => Ok(Framing::Addressed),
            other => Err(FieldbusError::config(format!("Unknown framing: {}", other))),
        }
    }
}

/// Unit address paired with the frame codec that serves it
#[derive(Debug, Clone)]
pub struct Protocol {
    address: u8,
    codec: Arc<dyn FrameCodec>,
}

impl Protocol {
    /// Standard function table under the given framing
    pub fn new(framing: Framing, address: u8) -> Self {
        Self::with_codec(address, framing.codec(Arc::new(FunctionTable::standard())))
    }

    pub fn with_codec(address: u8, codec: Arc<dyn FrameCodec>) -> Self {
        Self { address, codec }
    }

    pub fn stream(address: u8) -> Self {
        Self::new(Framing::Stream, address)
    }

    pub fn addressed(address: u8) -> Self {
        Self::new(Framing::Addressed, address)
    }

    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    #[inline]
    pub fn framing(&self) -> Framing {
        self.codec.framing()
    }

    pub fn codec(&self) -> &dyn FrameCodec {
        self.codec.as_ref()
    }

    /// Same codec, different unit address
    pub fn for_address(&self, address: u8) -> Self {
        Self {
            address,
            codec: Arc::clone(&self.codec),
        }
    }

    pub fn client_encode(&self, cmd: &Command, frame: &mut ByteWriter) -> bool {
        self.codec.client_encode(self.address, cmd, frame)
    }

    pub fn client_decode(&self, cmd: &mut Command, frame: &[u8]) -> CommResponse {
        self.codec.client_decode(self.address, cmd, frame)
    }

    pub fn server_encode(&self, cmd: &Command, frame: &mut ByteWriter) -> bool {
        self.codec.server_encode(self.address, cmd, frame)
    }

    pub fn server_decode(&self, cmd: &mut Command, frame: &[u8]) -> CommResponse {
        self.codec.server_decode(self.address, cmd, frame)
    }
}
