//! Discrete codecs: FC01, FC02, FC05, FC15

use tracing::debug;

use super::{count_in_range, unpack_bits, write_bit_payload, FunctionCodec};
use crate::bytes::{ByteReader, ByteWriter};
use crate::command::Command;
use crate::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_ILLEGAL_DATA_VALUE, MAX_READ_COILS, MAX_WRITE_COILS,
};

/// Read coils / read discrete inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadBits;

impl FunctionCodec for ReadBits {
    fn client_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        if !count_in_range(cmd.count, MAX_READ_COILS) {
            return false;
        }
        body.write_u16_be(cmd.offset);
        body.write_u16_be(cmd.count);
        true
    }

    fn client_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(1) {
            return false;
        }
        let byte_count = body.read_u8() as usize;
        if byte_count != (cmd.count as usize).div_ceil(8) || !body.can_read(byte_count) {
            return false;
        }
        cmd.data = unpack_bits(body.read_bytes(byte_count), cmd.count as usize);
        true
    }

    fn server_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        if !cmd.is_consistent() {
            return false;
        }
        write_bit_payload(body, &cmd.data)
    }

    fn server_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(4) {
            return false;
        }
        cmd.offset = body.read_u16_be();
        cmd.count = body.read_u16_be();
        if count_in_range(cmd.count, MAX_READ_COILS) {
            cmd.data = vec![0; cmd.count as usize];
        } else {
            debug!("Read of {} discretes rejected", cmd.count);
            cmd.set_exception(EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        true
    }
}

/// Write single coil
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteSingleCoil;

impl WriteSingleCoil {
    fn wire_value(cmd: &Command) -> Option<u16> {
        match cmd.data.as_slice() {
            [0] => Some(COIL_OFF),
            [_] => Some(COIL_ON),
            _ => None,
        }
    }
}

impl FunctionCodec for WriteSingleCoil {
    fn client_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        let Some(value) = Self::wire_value(cmd) else {
            return false;
        };
        body.write_u16_be(cmd.offset);
        body.write_u16_be(value);
        true
    }

    fn client_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(4) {
            return false;
        }
        let offset = body.read_u16_be();
        let value = body.read_u16_be();
        if offset != cmd.offset || (value != COIL_ON && value != COIL_OFF) {
            return false;
        }
        cmd.count = 1;
        cmd.data = vec![u16::from(value == COIL_ON)];
        true
    }

    fn server_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        self.client_encode(cmd, body)
    }

    fn server_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(4) {
            return false;
        }
        cmd.offset = body.read_u16_be();
        cmd.count = 1;
        match body.read_u16_be() {
            COIL_ON => cmd.data = vec![1],
            COIL_OFF => cmd.data = vec![0],
            other => {
                debug!("Coil value 0x{:04X} rejected", other);
                cmd.set_exception(EXCEPTION_ILLEGAL_DATA_VALUE);
            },
        }
        true
    }
}

/// Write multiple coils
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteMultipleCoils;

impl FunctionCodec for WriteMultipleCoils {
    fn client_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        if !count_in_range(cmd.count, MAX_WRITE_COILS) || !cmd.is_consistent() {
            return false;
        }
        body.write_u16_be(cmd.offset);
        body.write_u16_be(cmd.count);
        write_bit_payload(body, &cmd.data)
    }

    fn client_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(4) {
            return false;
        }
        let offset = body.read_u16_be();
        let count = body.read_u16_be();
        offset == cmd.offset && count == cmd.count
    }

    fn server_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        body.write_u16_be(cmd.offset);
        body.write_u16_be(cmd.count);
        true
    }

    fn server_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(5) {
            return false;
        }
        cmd.offset = body.read_u16_be();
        cmd.count = body.read_u16_be();
        let byte_count = body.read_u8() as usize;
        if !body.can_read(byte_count) {
            return false;
        }
        let packed = body.read_bytes(byte_count);

        if !count_in_range(cmd.count, MAX_WRITE_COILS)
            || byte_count != (cmd.count as usize).div_ceil(8)
        {
            debug!(
                "Write of {} coils with {} data bytes rejected",
                cmd.count, byte_count
            );
            cmd.set_exception(EXCEPTION_ILLEGAL_DATA_VALUE);
            return true;
        }
        cmd.data = unpack_bits(packed, cmd.count as usize);
        true
    }
}
