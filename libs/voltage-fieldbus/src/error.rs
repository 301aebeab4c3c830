//! Fieldbus Error Types
//!
//! Transport and configuration failures. Protocol decode outcomes are not
//! errors; they are reported as [`CommResponse`](crate::frame::CommResponse) values.

use thiserror::Error;

use crate::command::exception_description;

/// Result type for voltage-fieldbus operations
pub type Result<T> = std::result::Result<T, FieldbusError>;

/// Fieldbus errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldbusError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// The peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command could not be serialized
    #[error("Encode error: {0}")]
    Encode(String),

    /// The responder answered with an exception reply
    #[error("Exception reply to FC{function:02X}: 0x{code:02X} ({})", exception_description(*.code))]
    Exception { function: u8, code: u8 },

    /// Every attempt of a query ended without a usable reply
    #[error("No response after {attempts} attempts")]
    NoResponse { attempts: u32 },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for FieldbusError {
    fn from(err: std::io::Error) -> Self {
        FieldbusError::Io(err.to_string())
    }
}

#[cfg(feature = "serial")]
impl From<tokio_serial::Error> for FieldbusError {
    fn from(err: tokio_serial::Error) -> Self {
        FieldbusError::Io(format!("Serial error: {}", err))
    }
}

// Helper methods for creating errors
impl FieldbusError {
    pub fn io(msg: impl Into<String>) -> Self {
        FieldbusError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        FieldbusError::Timeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        FieldbusError::Config(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        FieldbusError::Encode(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        FieldbusError::Internal(msg.into())
    }

    /// Check if this error means the transport is gone and must be reopened
    pub fn needs_reconnect(&self) -> bool {
        match self {
            FieldbusError::Io(msg) => {
                msg.contains("Broken pipe")
                    || msg.contains("Connection reset")
                    || msg.contains("Connection refused")
                    || msg.contains("Connection aborted")
            },
            FieldbusError::ConnectionClosed => true,
            _ => false,
        }
    }
}
