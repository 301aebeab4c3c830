//! Address + CRC framing
//!
//! ```text
//! [unit:u8][function:u8][body][crc16:u16 LE]
//! ```
//!
//! There is no length field. The per-function decoder determines where the
//! body ends, and the frame is only complete once the CRC bytes after it have
//! arrived and match.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{CommResponse, FrameCodec, Framing};
use crate::bytes::{ByteReader, ByteWriter};
use crate::checksum::{crc16, verify_crc16};
use crate::command::Command;
use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_ILLEGAL_FUNCTION, MAX_ADDRESSED_ADU, MIN_ADDRESSED_ADU,
};
use crate::function::FunctionTable;

#[derive(Debug, Clone)]
pub struct AddressedFraming {
    functions: Arc<FunctionTable>,
}

/// Outcome of checking the CRC that follows the consumed bytes
enum Trailer {
    Pending,
    Valid(usize),
    Invalid,
}

impl AddressedFraming {
    pub fn new(functions: Arc<FunctionTable>) -> Self {
        Self { functions }
    }

    /// Verify the CRC directly after the bytes consumed by `reader`
    fn check_trailer(frame: &[u8], reader: &mut ByteReader<'_>) -> Trailer {
        let body_end = reader.position();
        if !reader.can_read(2) {
            return Trailer::Pending;
        }
        let received = reader.read_u16_le();
        let calculated = crc16(&frame[..body_end]);
        if received == calculated {
            Trailer::Valid(body_end + 2)
        } else {
            warn!(
                "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
                calculated, received
            );
            Trailer::Invalid
        }
    }

    fn write_frame(address: u8, function_code: u8, body: &ByteWriter, frame: &mut ByteWriter) -> bool {
        if 4 + body.len() > MAX_ADDRESSED_ADU {
            return false;
        }
        let start = frame.len();
        frame.write_u8(address);
        frame.write_u8(function_code);
        frame.append(body);
        let crc = crc16(&frame.as_slice()[start..]);
        frame.write_u16_le(crc);
        true
    }
}

impl FrameCodec for AddressedFraming {
    fn framing(&self) -> Framing {
        Framing::Addressed
    }

    fn client_encode(&self, address: u8, cmd: &Command, frame: &mut ByteWriter) -> bool {
        let Some(codec) = self.functions.get(cmd.function_code) else {
            debug!("No codec for FC{:02X}", cmd.function_code);
            return false;
        };
        let mut body = ByteWriter::new();
        codec.client_encode(cmd, &mut body)
            && Self::write_frame(address, cmd.function_code, &body, frame)
    }

    fn client_decode(&self, address: u8, cmd: &mut Command, frame: &[u8]) -> CommResponse {
        if frame.len() < MIN_ADDRESSED_ADU {
            return CommResponse::Unknown;
        }
        let mut reader = ByteReader::new(frame);
        let unit = reader.read_u8();
        if unit != address {
            debug!("Reply from unit {} while expecting {}", unit, address);
            return CommResponse::Ignore;
        }

        let function_code = reader.read_u8();
        if function_code & EXCEPTION_FLAG != 0 {
            // [unit][fc|0x80][code][crc]
            if !reader.can_read(1) {
                return CommResponse::Unknown;
            }
            let exception_code = reader.read_u8();
            return match Self::check_trailer(frame, &mut reader) {
                Trailer::Pending => CommResponse::Unknown,
                Trailer::Invalid => CommResponse::Critical,
                Trailer::Valid(length) => {
                    if function_code & !EXCEPTION_FLAG == cmd.function_code {
                        cmd.exception_code = exception_code;
                        cmd.query_length = length;
                    } else {
                        warn!(
                            "Exception reply FC{:02X} to request FC{:02X}",
                            function_code, cmd.function_code
                        );
                    }
                    CommResponse::Critical
                },
            };
        }

        if function_code != cmd.function_code {
            warn!(
                "Reply FC{:02X} to request FC{:02X}",
                function_code, cmd.function_code
            );
            return CommResponse::Critical;
        }
        let Some(codec) = self.functions.get(function_code) else {
            return CommResponse::Critical;
        };

        let mut decoded = cmd.clone();
        if !codec.client_decode(&mut decoded, &mut reader) {
            // A buffer that already carries its own CRC is a finished frame
            // whose body does not fit the request
            if verify_crc16(frame) {
                warn!(
                    "Malformed FC{:02X} reply body: {}",
                    function_code,
                    hex::encode(frame)
                );
                return CommResponse::Critical;
            }
            return CommResponse::Unknown;
        }
        match Self::check_trailer(frame, &mut reader) {
            Trailer::Pending => CommResponse::Unknown,
            Trailer::Invalid => CommResponse::Critical,
            Trailer::Valid(length) => {
                decoded.query_length = length;
                *cmd = decoded;
                CommResponse::Ack
            },
        }
    }

    fn server_encode(&self, address: u8, cmd: &Command, frame: &mut ByteWriter) -> bool {
        let mut body = ByteWriter::new();
        if cmd.is_exception() {
            body.write_u8(cmd.exception_code);
            return Self::write_frame(address, cmd.function_code | EXCEPTION_FLAG, &body, frame);
        }
        let Some(codec) = self.functions.get(cmd.function_code) else {
            return false;
        };
        codec.server_encode(cmd, &mut body)
            && Self::write_frame(address, cmd.function_code, &body, frame)
    }

    fn server_decode(&self, address: u8, cmd: &mut Command, frame: &[u8]) -> CommResponse {
        if frame.len() < MIN_ADDRESSED_ADU {
            return CommResponse::Unknown;
        }
        let mut reader = ByteReader::new(frame);
        let unit = reader.read_u8();
        if unit != address {
            debug!("Request for unit {}, serving {}", unit, address);
            return CommResponse::Ignore;
        }

        *cmd = Command {
            function_code: reader.read_u8(),
            ..Default::default()
        };

        let Some(codec) = self.functions.get(cmd.function_code) else {
            // Without a codec the body length is unknown; the whole buffer
            // counts as the frame once its CRC verifies
            if verify_crc16(frame) {
                debug!("Unsupported FC{:02X}", cmd.function_code);
                cmd.set_exception(EXCEPTION_ILLEGAL_FUNCTION);
                cmd.query_length = frame.len();
                return CommResponse::Ack;
            }
            return CommResponse::Unknown;
        };

        if !codec.server_decode(cmd, &mut reader) {
            return CommResponse::Unknown;
        }
        match Self::check_trailer(frame, &mut reader) {
            Trailer::Pending => CommResponse::Unknown,
            Trailer::Invalid => CommResponse::Ignore,
            Trailer::Valid(length) => {
                cmd.query_length = length;
                CommResponse::Ack
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::checksum::verify_crc16;
    use crate::constants::EXCEPTION_ILLEGAL_DATA_VALUE;

    fn codec() -> AddressedFraming {
        AddressedFraming::new(Arc::new(FunctionTable::standard()))
    }

    fn encode_request(address: u8, cmd: &Command) -> Vec<u8> {
        let mut frame = ByteWriter::new();
        assert!(codec().client_encode(address, cmd, &mut frame));
        frame.as_slice().to_vec()
    }

    fn encode_reply(address: u8, cmd: &Command) -> Vec<u8> {
        let mut frame = ByteWriter::new();
        assert!(codec().server_encode(address, cmd, &mut frame));
        frame.as_slice().to_vec()
    }

    #[test]
    fn test_request_layout() {
        assert_eq!(
            encode_request(1, &Command::read_holding_registers(0, 1)),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]
        );
    }

    #[test]
    fn test_read_discretes_exchange() {
        let request = encode_request(1, &Command::read_discrete_inputs(0, 4));

        let mut served = Command::default();
        assert_eq!(codec().server_decode(1, &mut served, &request), CommResponse::Ack);
        assert_eq!(served.query_length, request.len());
        served.data = vec![1, 0, 1, 1];

        let reply = encode_reply(1, &served);
        assert!(verify_crc16(&reply));

        let mut cmd = Command::read_discrete_inputs(0, 4);
        assert_eq!(codec().client_decode(1, &mut cmd, &reply), CommResponse::Ack);
        assert_eq!(cmd.data, vec![1, 0, 1, 1]);
    }

    #[test]
    fn test_corrupted_crc_is_critical_for_client() {
        let mut served = Command::read_holding_registers(0, 2);
        served.data = vec![0x1234, 0x5678];
        let mut reply = encode_reply(1, &served);
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;

        let mut cmd = Command::read_holding_registers(0, 2);
        assert_eq!(codec().client_decode(1, &mut cmd, &reply), CommResponse::Critical);
        assert!(cmd.data.is_empty());
    }

    #[test]
    fn test_corrupted_crc_is_ignored_by_server() {
        let mut request = encode_request(1, &Command::write_single_register(2, 5));
        request[7] ^= 0x01;
        let mut served = Command::default();
        assert_eq!(codec().server_decode(1, &mut served, &request), CommResponse::Ignore);
    }

    #[test]
    fn test_partial_frame_is_unknown() {
        let request = encode_request(7, &Command::write_multiple_coils(0, &[true; 12]));
        let mut served = Command::default();
        for cut in 0..request.len() {
            assert_eq!(
                codec().server_decode(7, &mut served, &request[..cut]),
                CommResponse::Unknown,
                "cut at {}",
                cut
            );
        }
        assert_eq!(codec().server_decode(7, &mut served, &request), CommResponse::Ack);
        assert_eq!(served.data, vec![1; 12]);
    }

    #[test]
    fn test_foreign_address() {
        let request = encode_request(3, &Command::read_coils(0, 1));
        let mut served = Command::default();
        assert_eq!(codec().server_decode(4, &mut served, &request), CommResponse::Ignore);

        let mut cmd = Command::read_coils(0, 1);
        assert_eq!(codec().client_decode(4, &mut cmd, &request), CommResponse::Ignore);
    }

    #[test]
    fn test_exception_reply() {
        let mut served = Command::write_single_coil(1, true);
        served.set_exception(EXCEPTION_ILLEGAL_DATA_VALUE);
        let reply = encode_reply(2, &served);
        assert_eq!(reply.len(), 5);
        assert_eq!(reply[1], 0x85);

        let mut cmd = Command::write_single_coil(1, true);
        assert_eq!(codec().client_decode(2, &mut cmd, &reply[..4]), CommResponse::Unknown);
        assert_eq!(codec().client_decode(2, &mut cmd, &reply), CommResponse::Critical);
        assert_eq!(cmd.exception_code, EXCEPTION_ILLEGAL_DATA_VALUE);
        assert_eq!(cmd.query_length, 5);
    }

    #[test]
    fn test_unsupported_function_needs_valid_crc() {
        let mut frame = vec![0x01, 0x2B, 0x0E, 0x01];
        let crc = crc16(&frame);
        assert_eq!(
            codec().server_decode(1, &mut Command::default(), &frame),
            CommResponse::Unknown
        );
        frame.extend_from_slice(&crc.to_le_bytes());

        let mut served = Command::default();
        assert_eq!(codec().server_decode(1, &mut served, &frame), CommResponse::Ack);
        assert_eq!(served.exception_code, EXCEPTION_ILLEGAL_FUNCTION);
        assert_eq!(served.query_length, frame.len());
    }

    #[test]
    fn test_write_registers_round_trip() {
        let values = [0x0001, 0x8000, 0xFFFF, 0x0000];
        let request = encode_request(11, &Command::write_multiple_registers(500, &values));

        let mut served = Command::default();
        assert_eq!(codec().server_decode(11, &mut served, &request), CommResponse::Ack);
        assert_eq!((served.offset, served.count), (500, 4));
        assert_eq!(served.data, values.to_vec());
    }

    #[test]
    fn test_checked_reply_with_short_body_is_critical() {
        // Byte count 2 while two registers were requested, CRC intact
        let mut reply = vec![0x01, 0x03, 0x02, 0x00, 0x0A];
        let crc = crc16(&reply);
        let mut cmd = Command::read_holding_registers(0, 2);
        assert_eq!(codec().client_decode(1, &mut cmd, &reply), CommResponse::Unknown);

        reply.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(codec().client_decode(1, &mut cmd, &reply), CommResponse::Critical);
        assert!(cmd.data.is_empty());
        assert_eq!(cmd.query_length, 0);
    }

    #[test]
    fn test_function_mismatch_is_critical() {
        let mut served = Command::read_input_registers(0, 1);
        served.data = vec![1];
        let reply = encode_reply(1, &served);
        let mut cmd = Command::read_holding_registers(0, 1);
        assert_eq!(codec().client_decode(1, &mut cmd, &reply), CommResponse::Critical);
    }
}
