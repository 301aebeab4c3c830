//! Protocol constants
//!
//! Limits are derived from the 253-byte PDU ceiling inherited from the RS485 ADU
//! (256 bytes - address - CRC).

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Stream (MBAP) header length up to and including the length field
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (function code + body) size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum value of the MBAP length field (unit id + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Largest stream frame: header + unit id + PDU
pub const MAX_STREAM_ADU: usize = MBAP_HEADER_LEN + MAX_MBAP_LENGTH;

/// Largest addressed frame: address + PDU + CRC
pub const MAX_ADDRESSED_ADU: usize = 1 + MAX_PDU_SIZE + 2;

/// Smallest addressed frame: address + function code + CRC
pub const MIN_ADDRESSED_ADU: usize = 4;

/// Read chunk size used when polling a transport
pub const READ_CHUNK_SIZE: usize = 512;

// ============================================================================
// Element Count Limits
// ============================================================================

/// Maximum coils/discrete inputs per read (FC01/FC02)
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum registers per read (FC03/FC04)
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils per write (FC15)
pub const MAX_WRITE_COILS: u16 = 1968;

/// Maximum registers per write (FC16)
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Wire value of an ON coil for FC05
pub const COIL_ON: u16 = 0xFF00;

/// Wire value of an OFF coil for FC05
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the function code of an exception reply
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// ============================================================================
// Exception Codes
// ============================================================================

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;
pub const EXCEPTION_NEGATIVE_ACKNOWLEDGE: u8 = 0x07;
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Timing Defaults
// ============================================================================

pub mod timeouts {
    use super::Duration;

    /// Query attempts before giving up
    pub const DEFAULT_RETRIES: u32 = 3;

    /// Per-attempt response timeout
    pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);

    /// Fixed turnaround allowance added to every attempt deadline
    pub const DEFAULT_LATENCY_MS: u64 = 50;
    pub const DEFAULT_LATENCY: Duration = Duration::from_millis(DEFAULT_LATENCY_MS);

    /// Stream sessions close after this long without a served frame
    pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS);

    /// Upper bound of one listener poll iteration
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

    /// Serial line silence after which a partial frame is dropped
    pub const DEFAULT_FRAME_GAP_MS: u64 = 1000;
    pub const DEFAULT_FRAME_GAP: Duration = Duration::from_millis(DEFAULT_FRAME_GAP_MS);

    /// Connection establishment timeout
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_fit_in_pdu() {
        // FC + byte count + packed bits
        assert!(2 + (MAX_READ_COILS as usize).div_ceil(8) <= MAX_PDU_SIZE);
        // FC + byte count + registers
        assert!(2 + MAX_READ_REGISTERS as usize * 2 <= MAX_PDU_SIZE);
        // FC + offset + count + byte count + packed bits
        assert!(6 + (MAX_WRITE_COILS as usize).div_ceil(8) <= MAX_PDU_SIZE);
        assert!(6 + MAX_WRITE_REGISTERS as usize * 2 <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_adu_sizes() {
        assert_eq!(MAX_STREAM_ADU, 260);
        assert_eq!(MAX_ADDRESSED_ADU, 256);
    }
}
