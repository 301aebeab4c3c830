//! Length-prefixed stream framing
//!
//! ```text
//! [transaction id:u16][protocol id:u16 = 0][length:u16][unit:u8][function:u8][body]
//! ```
//!
//! `length` counts the unit, function and body bytes. No checksum: the
//! transport is trusted to deliver bytes intact, the length field only
//! delimits frames.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{CommResponse, FrameCodec, Framing};
use crate::bytes::{ByteReader, ByteWriter};
use crate::command::Command;
use crate::constants::{
    EXCEPTION_FLAG, EXCEPTION_ILLEGAL_FUNCTION, MAX_MBAP_LENGTH, MBAP_HEADER_LEN,
};
use crate::function::FunctionTable;

#[derive(Debug, Clone)]
pub struct StreamFraming {
    functions: Arc<FunctionTable>,
}

struct Header {
    transaction_id: u16,
    protocol_id: u16,
    length: usize,
}

impl StreamFraming {
    pub fn new(functions: Arc<FunctionTable>) -> Self {
        Self { functions }
    }

    fn read_header(reader: &mut ByteReader<'_>) -> Option<Header> {
        if !reader.can_read(MBAP_HEADER_LEN) {
            return None;
        }
        Some(Header {
            transaction_id: reader.read_u16_be(),
            protocol_id: reader.read_u16_be(),
            length: reader.read_u16_be() as usize,
        })
    }

    fn write_frame(
        transaction_id: u16,
        address: u8,
        function_code: u8,
        body: &ByteWriter,
        frame: &mut ByteWriter,
    ) -> bool {
        let Ok(length) = u16::try_from(2 + body.len()) else {
            return false;
        };
        if length as usize > MAX_MBAP_LENGTH {
            return false;
        }
        frame.write_u16_be(transaction_id);
        frame.write_u16_be(0);
        frame.write_u16_be(length);
        frame.write_u8(address);
        frame.write_u8(function_code);
        frame.append(body);
        true
    }
}

impl FrameCodec for StreamFraming {
    fn framing(&self) -> Framing {
        Framing::Stream
    }

    fn client_encode(&self, address: u8, cmd: &Command, frame: &mut ByteWriter) -> bool {
        let Some(codec) = self.functions.get(cmd.function_code) else {
            debug!("No codec for FC{:02X}", cmd.function_code);
            return false;
        };
        let mut body = ByteWriter::new();
        codec.client_encode(cmd, &mut body)
            && Self::write_frame(cmd.transaction_id, address, cmd.function_code, &body, frame)
    }

    fn client_decode(&self, address: u8, cmd: &mut Command, frame: &[u8]) -> CommResponse {
        let mut reader = ByteReader::new(frame);
        let Some(header) = Self::read_header(&mut reader) else {
            return CommResponse::Unknown;
        };
        if header.protocol_id != 0 {
            warn!("Reply with protocol id {:04X}", header.protocol_id);
            return CommResponse::Critical;
        }
        if !(2..=MAX_MBAP_LENGTH).contains(&header.length) {
            warn!("Reply with invalid length {}", header.length);
            return CommResponse::Critical;
        }
        if !reader.can_read(header.length) {
            return CommResponse::Unknown;
        }

        let mut pdu = reader.slice(header.length);
        let unit = pdu.read_u8();
        if unit != address {
            debug!("Reply from unit {} while expecting {}", unit, address);
            return CommResponse::Ignore;
        }
        if header.transaction_id != cmd.transaction_id {
            debug!(
                "Reply tid {:04X} does not match request tid {:04X}",
                header.transaction_id, cmd.transaction_id
            );
            return CommResponse::Ignore;
        }

        let function_code = pdu.read_u8();
        if function_code & !EXCEPTION_FLAG != cmd.function_code {
            warn!(
                "Reply FC{:02X} to request FC{:02X}",
                function_code, cmd.function_code
            );
            return CommResponse::Critical;
        }

        let query_length = MBAP_HEADER_LEN + header.length;
        if function_code & EXCEPTION_FLAG != 0 {
            if !pdu.can_read(1) {
                return CommResponse::Critical;
            }
            cmd.exception_code = pdu.read_u8();
            cmd.query_length = query_length;
            return CommResponse::Critical;
        }

        let Some(codec) = self.functions.get(function_code) else {
            return CommResponse::Critical;
        };
        // The declared length is fully buffered, so a body the codec
        // rejects will not become valid with more bytes.
        let mut decoded = cmd.clone();
        if !codec.client_decode(&mut decoded, &mut pdu) {
            warn!(
                "Malformed FC{:02X} reply body: {}",
                function_code,
                hex::encode(&frame[..query_length])
            );
            return CommResponse::Critical;
        }
        decoded.query_length = query_length;
        *cmd = decoded;
        CommResponse::Ack
    }

    fn server_encode(&self, address: u8, cmd: &Command, frame: &mut ByteWriter) -> bool {
        let mut body = ByteWriter::new();
        let function_code = if cmd.is_exception() {
            body.write_u8(cmd.exception_code);
            cmd.function_code | EXCEPTION_FLAG
        } else {
            let Some(codec) = self.functions.get(cmd.function_code) else {
                return false;
            };
            if !codec.server_encode(cmd, &mut body) {
                return false;
            }
            cmd.function_code
        };
        Self::write_frame(cmd.transaction_id, address, function_code, &body, frame)
    }

    fn server_decode(&self, address: u8, cmd: &mut Command, frame: &[u8]) -> CommResponse {
        let mut reader = ByteReader::new(frame);
        let Some(header) = Self::read_header(&mut reader) else {
            return CommResponse::Unknown;
        };
        if header.protocol_id != 0 || !(2..=MAX_MBAP_LENGTH).contains(&header.length) {
            warn!(
                "Dropping request with protocol id {:04X}, length {}",
                header.protocol_id, header.length
            );
            return CommResponse::Ignore;
        }
        if !reader.can_read(header.length) {
            return CommResponse::Unknown;
        }

        let mut pdu = reader.slice(header.length);
        let unit = pdu.read_u8();
        if unit != address {
            debug!("Request for unit {}, serving {}", unit, address);
            return CommResponse::Ignore;
        }

        *cmd = Command {
            function_code: pdu.read_u8(),
            transaction_id: header.transaction_id,
            query_length: MBAP_HEADER_LEN + header.length,
            ..Default::default()
        };

        match self.functions.get(cmd.function_code) {
            None => {
                debug!("Unsupported FC{:02X}", cmd.function_code);
                cmd.set_exception(EXCEPTION_ILLEGAL_FUNCTION);
                CommResponse::Ack
            },
            Some(codec) => {
                if codec.server_decode(cmd, &mut pdu) {
                    CommResponse::Ack
                } else {
                    warn!(
                        "Malformed FC{:02X} request body ({} bytes)",
                        cmd.function_code,
                        header.length - 2
                    );
                    CommResponse::Ignore
                }
            },
        }
    }
}
