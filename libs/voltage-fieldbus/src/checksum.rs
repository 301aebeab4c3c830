//! Checksum algorithms
//!
//! Table-driven CRCs from the `crc` crate. All functions are pure and the
//! tables are `const`, so they are shared freely between sessions.
//!
//! - CRC-16/MODBUS (reflected 0xA001, seed 0xFFFF) protects addressed frames.
//! - CRC-32/ISO-HDLC and CRC-16/CCITT-FALSE are kept for general reuse.

use crc::{Crc, CRC_16_IBM_3740, CRC_16_MODBUS, CRC_32_ISO_HDLC};

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);
const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
const HDLC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-16/MODBUS over the whole slice
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS.checksum(data)
}

/// CRC-16/MODBUS over `count` bytes starting at `offset`
///
/// # Panics
///
/// Panics if the range is outside `data`.
pub fn crc16_range(data: &[u8], offset: usize, count: usize) -> u16 {
    MODBUS.checksum(&data[offset..offset + count])
}

/// CRC-32/ISO-HDLC over `count` bytes starting at `offset`
///
/// # Panics
///
/// Panics if the range is outside `data`.
pub fn crc32_range(data: &[u8], offset: usize, count: usize) -> u32 {
    HDLC32.checksum(&data[offset..offset + count])
}

/// CRC-16/CCITT-FALSE over `count` bytes starting at `offset`
///
/// # Panics
///
/// Panics if the range is outside `data`.
pub fn crc_ccitt_range(data: &[u8], offset: usize, count: usize) -> u16 {
    CCITT.checksum(&data[offset..offset + count])
}

/// Whether the last two bytes of `frame` are the little-endian CRC-16 of the rest
pub fn verify_crc16(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let body_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
    crc16_range(frame, 0, body_len) == received
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_INPUT: &[u8] = b"123456789";

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(CHECK_INPUT), 0x4B37);
    }

    #[test]
    fn test_crc16_known_request() {
        // 01 03 00 00 00 01 goes out with CRC bytes 84 0A
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16(&data), 0x0A84);
    }

    #[test]
    fn test_crc16_empty_is_seed() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_range_matches_slice() {
        let data = [0xAA, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0xBB];
        assert_eq!(crc16_range(&data, 1, 6), 0x0A84);
    }

    #[test]
    fn test_crc16_trailing_field_self_consistency() {
        for body in [
            &b"\x01\x03\x00\x00\x00\x01"[..],
            &b"\x11\x10\x00\x01\x00\x02\x04\x00\x0A\x01\x02"[..],
            &b"\x09"[..],
        ] {
            let crc = crc16(body);
            let mut frame = body.to_vec();
            frame.extend_from_slice(&crc.to_le_bytes());

            assert_eq!(crc16_range(&frame, 0, frame.len() - 2), crc);
            assert!(verify_crc16(&frame));
            // Reflected CRC with no final xor leaves a zero residue
            assert_eq!(crc16(&frame), 0);
        }
    }

    #[test]
    fn test_verify_crc16_rejects_corruption() {
        let mut frame = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        assert!(verify_crc16(&frame));
        frame[7] ^= 0x01;
        assert!(!verify_crc16(&frame));
        assert!(!verify_crc16(&[0x01]));
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32_range(CHECK_INPUT, 0, CHECK_INPUT.len()), 0xCBF4_3926);
    }

    #[test]
    fn test_crc_ccitt_check_value() {
        assert_eq!(crc_ccitt_range(CHECK_INPUT, 0, CHECK_INPUT.len()), 0x29B1);
    }

    #[test]
    #[should_panic]
    fn test_range_outside_data_panics() {
        crc16_range(&[0x01, 0x02], 1, 5);
    }
}
