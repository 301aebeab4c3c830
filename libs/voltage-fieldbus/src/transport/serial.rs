//! Serial line transport

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info};

use super::IoTransport;
use crate::config::{Parity, SerialSettings};
use crate::error::{FieldbusError, Result};

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

/// Open a serial port as a byte stream
///
/// Must be called from within a tokio runtime.
pub fn open_serial(settings: &SerialSettings) -> Result<IoTransport<SerialStream>> {
    debug!("Serial: {} @{}baud {}", settings.device, settings.baud_rate, settings.format());

    match tokio_serial::new(&settings.device, settings.baud_rate)
        .data_bits(data_bits(settings.data_bits))
        .parity(parity(settings.parity))
        .stop_bits(stop_bits(settings.stop_bits))
        .open_native_async()
    {
        Ok(port) => {
            info!("Serial opened: {}", settings.device);
            Ok(IoTransport::new(port))
        },
        Err(e) => {
            error!("Serial err: {} - {}", settings.device, e);
            Err(FieldbusError::io(format!(
                "Failed to open serial port {}: {e}",
                settings.device
            )))
        },
    }
}
