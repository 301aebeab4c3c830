//! Register codecs: FC03, FC04, FC06, FC16

use tracing::debug;

use super::{count_in_range, write_register_payload, FunctionCodec};
use crate::bytes::{ByteReader, ByteWriter};
use crate::command::Command;
use crate::constants::{EXCEPTION_ILLEGAL_DATA_VALUE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

fn read_registers(body: &mut ByteReader<'_>, count: usize) -> Vec<u16> {
    (0..count).map(|_| body.read_u16_be()).collect()
}

/// Read holding registers / read input registers
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadRegisters;

impl FunctionCodec for ReadRegisters {
    fn client_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        if !count_in_range(cmd.count, MAX_READ_REGISTERS) {
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
        if byte_count != cmd.count as usize * 2 || !body.can_read(byte_count) {
            return false;
        }
        cmd.data = read_registers(body, cmd.count as usize);
        true
    }

    fn server_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        cmd.is_consistent() && write_register_payload(body, &cmd.data)
    }

    fn server_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(4) {
            return false;
        }
        cmd.offset = body.read_u16_be();
        cmd.count = body.read_u16_be();
        if count_in_range(cmd.count, MAX_READ_REGISTERS) {
            cmd.data = vec![0; cmd.count as usize];
        } else {
            debug!("Read of {} registers rejected", cmd.count);
            cmd.set_exception(EXCEPTION_ILLEGAL_DATA_VALUE);
        }
        true
    }
}

/// Write single register
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteSingleRegister;

impl FunctionCodec for WriteSingleRegister {
    fn client_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        let [value] = cmd.data.as_slice() else {
            return false;
        };
        body.write_u16_be(cmd.offset);
        body.write_u16_be(*value);
        true
    }

    fn client_decode(&self, cmd: &mut Command, body: &mut ByteReader<'_>) -> bool {
        if !body.can_read(4) {
            return false;
        }
        let offset = body.read_u16_be();
        let value = body.read_u16_be();
        if offset != cmd.offset {
            return false;
        }
        cmd.count = 1;
        cmd.data = vec![value];
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
        cmd.data = vec![body.read_u16_be()];
        true
    }
}

/// Write multiple registers
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteMultipleRegisters;

impl FunctionCodec for WriteMultipleRegisters {
    fn client_encode(&self, cmd: &Command, body: &mut ByteWriter) -> bool {
        if !count_in_range(cmd.count, MAX_WRITE_REGISTERS) || !cmd.is_consistent() {
            return false;
        }
        body.write_u16_be(cmd.offset);
        body.write_u16_be(cmd.count);
        write_register_payload(body, &cmd.data)
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
        let mut payload = body.slice(byte_count);

        if !count_in_range(cmd.count, MAX_WRITE_REGISTERS) || byte_count != cmd.count as usize * 2 {
            debug!(
                "Write of {} registers with {} data bytes rejected",
                cmd.count, byte_count
            );
            cmd.set_exception(EXCEPTION_ILLEGAL_DATA_VALUE);
            return true;
        }
        cmd.data = read_registers(&mut payload, cmd.count as usize);
        true
    }
}
