//! Voltage Fieldbus Library
//!
//! Master/slave fieldbus protocol engine for exchanging discretes and
//! registers with remote I/O over sockets and serial lines.
//!
//! # Architecture
//!
//! - **Buffers**: `ByteWriter` / `ByteReader` over the `bytes` crate
//! - **Checksums**: CRC-16/MODBUS plus CRC-32 and CRC-CCITT
//! - **Function Codecs**: one `FunctionCodec` per function family, looked up
//!   in a `FunctionTable`
//! - **Frame Codecs**: `StreamFraming` (length prefix) and
//!   `AddressedFraming` (address + CRC), reporting a `CommResponse`
//! - **Client**: retry/timeout query engine over a locked transport
//! - **Server**: `StreamListener` and `DatagramListener` tasks dispatching to
//!   a `CommandHandler`
//!
//! # Features
//!
//! - `serial` - serial line transport via `tokio-serial` (default)

pub mod bytes;
pub mod checksum;
pub mod client;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod function;
pub mod server;
pub mod transport;

// Re-export core types
pub use client::{Client, Exchange, QueryPolicy};
pub use command::{exception_description, Command, FunctionCode};
pub use config::{FieldbusConfig, Parity, SerialSettings, TransportSettings};
pub use error::{FieldbusError, Result};
pub use frame::{CommResponse, FrameCodec, Framing, Protocol};
pub use function::{FunctionCodec, FunctionTable};
pub use server::{
    CommandHandler, DatagramListener, ListenerHandle, ListenerOptions, SessionStats,
    StreamListener,
};
pub use transport::{DatagramTransport, IoTransport, StreamTransport, UdpTransport};
