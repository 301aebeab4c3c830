//! Per-function codecs
//!
//! One [`FunctionCodec`] per function family, independent of framing. Frame
//! codecs look the codec up in a [`FunctionTable`] by function code and hand it
//! the body of the frame (everything after the function code byte).
//!
//! All four operations return `false` when the body is short or malformed.
//! Callers turn that into an `Unknown` outcome, never an error. A server decode
//! that reads a well-formed but unacceptable request (count out of range, bad
//! coil value) returns `true` with `exception_code` set instead.

mod bits;
mod registers;

use std::collections::HashMap;
use std::fmt;

use crate::bytes::{ByteReader, ByteWriter};
use crate::command::{Command, FunctionCode};

pub use bits::{ReadBits, WriteMultipleCoils, WriteSingleCoil};
pub use registers::{ReadRegisters, WriteMultipleRegisters, WriteSingleRegister};

/// Encode/decode strategy for one function code
pub trait FunctionCodec: Send + Sync + fmt::Debug {
    /// Serialize the request body
    fn client_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool;

    /// Parse the response body into `cmd.data`
    fn client_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool;

    /// Serialize the reply body
    fn server_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool;

    /// Parse the request body into offset/count and, for writes, the payload
    fn server_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool;
}

/// Function codec lookup keyed by function code
///
/// Built once and shared read-only between frame codecs.
pub struct FunctionTable {
    codecs: HashMap<u8, Box<dyn FunctionCodec>>,
}

impl FunctionTable {
    /// Empty table; every request is answered with "illegal function"
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Table with every supported function code
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(FunctionCode::ReadCoils, ReadBits);
        table.register(FunctionCode::ReadDiscreteInputs, ReadBits);
        table.register(FunctionCode::ReadHoldingRegisters, ReadRegisters);
        table.register(FunctionCode::ReadInputRegisters, ReadRegisters);
        table.register(FunctionCode::WriteSingleCoil, WriteSingleCoil);
        table.register(FunctionCode::WriteSingleRegister, WriteSingleRegister);
        table.register(FunctionCode::WriteMultipleCoils, WriteMultipleCoils);
        table.register(FunctionCode::WriteMultipleRegisters, WriteMultipleRegisters);
        table
    }

    pub fn register(&mut self, function: FunctionCode, codec: impl FunctionCodec + 'static) {
        self.codecs.insert(function.code(), Box::new(codec));
    }

    pub fn remove(&mut self, function: FunctionCode) {
        self.codecs.remove(&function.code());
    }

    pub fn get(&self, code: u8) -> Option<&dyn FunctionCodec> {
        self.codecs.get(&code).map(|codec| codec.as_ref())
    }

    pub fn supports(&self, code: u8) -> bool {
        self.codecs.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.codecs.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("FunctionTable")
            .field("codes", &codes)
            .finish()
    }
}

/// Pack logical bits into `ceil(n/8)` bytes, LSB-first
pub fn pack_bits(bits: &[u16]) -> Vec<u8> {
    let mut packed = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit != 0 {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

/// Unpack `count` bits from LSB-first bytes
///
/// # Panics
///
/// Panics if `packed` holds fewer than `count` bits.
pub fn unpack_bits(packed: &[u8], count: usize) -> Vec<u16> {
    (0..count)
        .map(|i| u16::from((packed[i / 8] >> (i % 8)) & 0x01))
        .collect()
}

/// Byte count prefix followed by the packed bits
pub(crate) fn write_bit_payload(body: &mut ByteWriter, bits: &[u16]) -> bool {
    let packed = pack_bits(bits);
    let Ok(byte_count) = u8::try_from(packed.len()) else {
        return false;
    };
    body.write_u8(byte_count);
    body.write_bytes(&packed);
    true
}

/// Byte count prefix followed by big-endian registers
pub(crate) fn write_register_payload(body: &mut ByteWriter, registers: &[u16]) -> bool {
    let Ok(byte_count) = u8::try_from(registers.len() * 2) else {
        return false;
    };
    body.write_u8(byte_count);
    for &value in registers {
        body.write_u16_be(value);
    }
    true
}

/// Whether `count` lies in `1..=limit`
#[inline]
pub(crate) fn count_in_range(count: u16, limit: u16) -> bool {
    (1..=limit).contains(&count)
}
