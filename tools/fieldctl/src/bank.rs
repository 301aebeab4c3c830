//! In-memory register bank served by `fieldctl serve`

use parking_lot::RwLock;
use tracing::debug;
use voltage_fieldbus::constants::{EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_FUNCTION};
use voltage_fieldbus::{Command, CommandHandler, FunctionCode};

/// Initial contents of the tables a client cannot write, from offset 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presets {
    pub discrete_inputs: Vec<bool>,
    pub input_registers: Vec<u16>,
}

/// The four data tables of a device, each `size` elements long
///
/// Bit tables hold 0/1 values. All tables start zeroed.
#[derive(Debug)]
pub struct RegisterBank {
    coils: RwLock<Vec<u16>>,
    discrete_inputs: RwLock<Vec<u16>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
}

impl RegisterBank {
    pub fn new(size: usize) -> Self {
        Self {
            coils: RwLock::new(vec![0; size]),
            discrete_inputs: RwLock::new(vec![0; size]),
            holding_registers: RwLock::new(vec![0; size]),
            input_registers: RwLock::new(vec![0; size]),
        }
    }

    /// Bank with the read-only tables preset from the command line
    pub fn with_presets(size: usize, presets: &Presets) -> anyhow::Result<Self> {
        let bank = Self::new(size);
        if !bank.set_discrete_inputs(0, &presets.discrete_inputs) {
            anyhow::bail!(
                "{} discrete input presets do not fit {} elements",
                presets.discrete_inputs.len(),
                size
            );
        }
        if !bank.set_input_registers(0, &presets.input_registers) {
            anyhow::bail!(
                "{} input register presets do not fit {} elements",
                presets.input_registers.len(),
                size
            );
        }
        Ok(bank)
    }

    /// Preset discrete inputs; they cannot be written over the wire
    fn set_discrete_inputs(&self, offset: usize, values: &[bool]) -> bool {
        let mut table = self.discrete_inputs.write();
        let Some(slot) = table.get_mut(offset..offset + values.len()) else {
            return false;
        };
        for (dst, &on) in slot.iter_mut().zip(values) {
            *dst = u16::from(on);
        }
        true
    }

    /// Preset input registers; they cannot be written over the wire
    fn set_input_registers(&self, offset: usize, values: &[u16]) -> bool {
        let mut table = self.input_registers.write();
        let Some(slot) = table.get_mut(offset..offset + values.len()) else {
            return false;
        };
        slot.copy_from_slice(values);
        true
    }

    #[cfg(test)]
    pub fn holding_registers(&self, offset: usize, count: usize) -> Option<Vec<u16>> {
        self.holding_registers
            .read()
            .get(offset..offset + count)
            .map(<[u16]>::to_vec)
    }

    #[cfg(test)]
    pub fn coils(&self, offset: usize, count: usize) -> Option<Vec<bool>> {
        self.coils
            .read()
            .get(offset..offset + count)
            .map(|bits| bits.iter().map(|&b| b != 0).collect())
    }

    fn table(&self, function: FunctionCode) -> &RwLock<Vec<u16>> {
        match function {
            FunctionCode::ReadCoils
            | FunctionCode::WriteSingleCoil
            | FunctionCode::WriteMultipleCoils => &self.coils,
            FunctionCode::ReadDiscreteInputs => &self.discrete_inputs,
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleRegisters => &self.holding_registers,
            FunctionCode::ReadInputRegisters => &self.input_registers,
        }
    }
}

impl CommandHandler for RegisterBank {
    fn handle(&self, cmd: &mut Command) {
        let Some(function) = cmd.function() else {
            cmd.set_exception(EXCEPTION_ILLEGAL_FUNCTION);
            return;
        };
        let start = usize::from(cmd.offset);
        let range = start..start + usize::from(cmd.count);
        let table = self.table(function);

        if function.is_write() {
            let mut table = table.write();
            match table.get_mut(range) {
                Some(slot) if slot.len() == cmd.data.len() => {
                    if function.is_discrete() {
                        for (dst, &src) in slot.iter_mut().zip(&cmd.data) {
                            *dst = u16::from(src != 0);
                        }
                    } else {
                        slot.copy_from_slice(&cmd.data);
                    }
                },
                _ => cmd.set_exception(EXCEPTION_ILLEGAL_DATA_ADDRESS),
            }
        } else {
            let table = table.read();
            match table.get(range) {
                Some(values) => cmd.data = values.to_vec(),
                None => cmd.set_exception(EXCEPTION_ILLEGAL_DATA_ADDRESS),
            }
        }

        debug!(
            "{} offset={} count={} exception={}",
            function, cmd.offset, cmd.count, cmd.exception_code
        );
    }
}
