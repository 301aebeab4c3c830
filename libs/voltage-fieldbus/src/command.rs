//! Command model
//!
//! A [`Command`] is one protocol transaction. The client builds one right
//! before a query; the server frame codec builds one when a request header
//! decodes. Per-function codecs fill `data` during decode.
//!
//! `data` always holds one element per addressed item: a register value, or
//! `0`/`1` for a discrete. Bit packing happens on the wire only.

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = FC_READ_COILS,
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 8] = [
        FunctionCode::ReadCoils,
        FunctionCode::ReadDiscreteInputs,
        FunctionCode::ReadHoldingRegisters,
        FunctionCode::ReadInputRegisters,
        FunctionCode::WriteSingleCoil,
        FunctionCode::WriteSingleRegister,
        FunctionCode::WriteMultipleCoils,
        FunctionCode::WriteMultipleRegisters,
    ];

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|fc| fc.code() == code)
    }

    /// Whether elements are single bits packed on the wire
    pub fn is_discrete(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::WriteSingleCoil
                | FunctionCode::WriteMultipleCoils
        )
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleCoils
                | FunctionCode::WriteMultipleRegisters
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(code)
    }
}

impl From<FunctionCode> for u8 {
    fn from(fc: FunctionCode) -> Self {
        fc.code()
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FC{:02X} ({})", self.code(), self.description())
    }
}

/// Human-readable exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal Function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal Data Address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal Data Value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Slave Device Failure",
        EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Slave Device Busy",
        EXCEPTION_NEGATIVE_ACKNOWLEDGE => "Negative Acknowledge",
        EXCEPTION_MEMORY_PARITY_ERROR => "Memory Parity Error",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway Path Unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

/// One protocol transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Raw function code (may be unsupported on the server side)
    pub function_code: u8,
    /// First element address
    pub offset: u16,
    /// Element count
    pub count: u16,
    /// One entry per element; discretes are 0 or 1
    pub data: Vec<u16>,
    /// 0 = none, otherwise the exception reported by the responder
    pub exception_code: u8,
    /// Correlation token, used by stream framing only
    pub transaction_id: u16,
    /// Bytes of the inbound buffer consumed by the last successful decode
    pub query_length: usize,
}

impl Command {
    pub fn new(function: FunctionCode, offset: u16, count: u16) -> Self {
        Self {
            function_code: function.code(),
            offset,
            count,
            ..Default::default()
        }
    }

    pub fn read_coils(offset: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadCoils, offset, count)
    }

    pub fn read_discrete_inputs(offset: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadDiscreteInputs, offset, count)
    }

    pub fn read_holding_registers(offset: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadHoldingRegisters, offset, count)
    }

    pub fn read_input_registers(offset: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadInputRegisters, offset, count)
    }

    pub fn write_single_coil(offset: u16, on: bool) -> Self {
        Self::new(FunctionCode::WriteSingleCoil, offset, 1).with_data(vec![u16::from(on)])
    }

    pub fn write_single_register(offset: u16, value: u16) -> Self {
        Self::new(FunctionCode::WriteSingleRegister, offset, 1).with_data(vec![value])
    }

    pub fn write_multiple_coils(offset: u16, values: &[bool]) -> Self {
        Self::new(
            FunctionCode::WriteMultipleCoils,
            offset,
            values.len() as u16,
        )
        .with_data(values.iter().map(|&on| u16::from(on)).collect())
    }

    pub fn write_multiple_registers(offset: u16, values: &[u16]) -> Self {
        Self::new(
            FunctionCode::WriteMultipleRegisters,
            offset,
            values.len() as u16,
        )
        .with_data(values.to_vec())
    }

    pub fn with_data(mut self, data: Vec<u16>) -> Self {
        self.data = data;
        self
    }

    /// Supported function, if any
    pub fn function(&self) -> Option<FunctionCode> {
        FunctionCode::from_code(self.function_code)
    }

    pub fn is_exception(&self) -> bool {
        self.exception_code != 0
    }

    /// Flag the command as failed; the reply takes the exception path
    pub fn set_exception(&mut self, code: u8) {
        self.exception_code = code;
    }

    /// Discrete values as booleans
    pub fn bits(&self) -> Vec<bool> {
        self.data.iter().map(|&v| v != 0).collect()
    }

    /// Whether `count` and `data` agree, which holds after every successful decode
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.count as usize
    }
}
