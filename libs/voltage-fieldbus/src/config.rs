//! Fieldbus configuration
//!
//! `FieldbusConfig` is plain serde data; callers layer it from files and
//! environment (see `fieldctl`). Transport settings use a URL-like string:
//!
//! ```text
//! tcp://192.168.1.10:502
//! udp://0.0.0.0:1502
//! serial:///dev/ttyUSB0?baud=19200&format=8E1
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::QueryPolicy;
use crate::constants::timeouts;
use crate::error::{FieldbusError, Result};
use crate::frame::{Framing, Protocol};
use crate::server::ListenerOptions;

/// Highest assignable unit address
pub const MAX_UNIT_ADDRESS: u8 = 247;

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl Parity {
    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

/// Serial line parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl SerialSettings {
    /// Compact line format such as `8N1`
    pub fn format(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }

    fn parse_format(&mut self, format: &str) -> Result<()> {
        let invalid = || FieldbusError::config(format!("Invalid serial format: {format}"));
        let mut chars = format.chars();
        let (Some(data), Some(parity), Some(stop), None) =
            (chars.next(), chars.next(), chars.next(), chars.next())
        else {
            return Err(invalid());
        };

        self.data_bits = match data {
            '5'..='8' => data as u8 - b'0',
            _ => return Err(invalid()),
        };
        self.parity = match parity.to_ascii_uppercase() {
            'N' => Parity::None,
            'E' => Parity::Even,
            'O' => Parity::Odd,
            _ => return Err(invalid()),
        };
        self.stop_bits = match stop {
            '1' => 1,
            '2' => 2,
            _ => return Err(invalid()),
        };
        Ok(())
    }
}

/// Parsed transport settings string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransportSettings {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Serial(SerialSettings),
}

impl TransportSettings {
    /// Framing normally used on this medium
    pub fn default_framing(&self) -> Framing {
        match self {
            TransportSettings::Serial(_) => Framing::Addressed,
            _ => Framing::Stream,
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, TransportSettings::Serial(_))
    }

    /// `host:port` for socket transports
    pub fn socket_address(&self) -> Option<String> {
        match self {
            TransportSettings::Tcp { host, port } | TransportSettings::Udp { host, port } => {
                if host.contains(':') {
                    Some(format!("[{host}]:{port}"))
                } else {
                    Some(format!("{host}:{port}"))
                }
            },
            TransportSettings::Serial(_) => None,
        }
    }

    fn parse_host_port(scheme: &str, rest: &str) -> Result<(String, u16)> {
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
            FieldbusError::config(format!("{scheme} transport needs host:port, got '{rest}'"))
        })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(FieldbusError::config(format!("{scheme} transport is missing a host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| FieldbusError::config(format!("Invalid port '{port}'")))?;
        Ok((host.to_string(), port))
    }

    fn parse_serial(rest: &str) -> Result<SerialSettings> {
        let (device, query) = match rest.split_once('?') {
            Some((device, query)) => (device, Some(query)),
            None => (rest, None),
        };
        if device.is_empty() {
            return Err(FieldbusError::config("Serial transport is missing a device"));
        }

        let mut settings = SerialSettings {
            device: device.to_string(),
            ..SerialSettings::default()
        };
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                FieldbusError::config(format!("Invalid serial option '{pair}'"))
            })?;
            match key {
                "baud" => {
                    settings.baud_rate = value
                        .parse()
                        .ok()
                        .filter(|&baud: &u32| baud > 0)
                        .ok_or_else(|| FieldbusError::config(format!("Invalid baud rate '{value}'")))?;
                },
                "format" => settings.parse_format(value)?,
                other => {
                    return Err(FieldbusError::config(format!(
                        "Unknown serial option '{other}'"
                    )))
                },
            }
        }
        Ok(settings)
    }
}

impl FromStr for TransportSettings {
    type Err = FieldbusError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| FieldbusError::config(format!("Invalid transport settings '{s}'")))?;

        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => {
                let (host, port) = Self::parse_host_port("tcp", rest)?;
                Ok(TransportSettings::Tcp { host, port })
            },
            "udp" => {
                let (host, port) = Self::parse_host_port("udp", rest)?;
                Ok(TransportSettings::Udp { host, port })
            },
            "serial" => Ok(TransportSettings::Serial(Self::parse_serial(rest)?)),
            other => Err(FieldbusError::config(format!(
                "Unsupported transport scheme '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for TransportSettings {
    type Error = FieldbusError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TransportSettings> for String {
    fn from(settings: TransportSettings) -> Self {
        settings.to_string()
    }
}

impl fmt::Display for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSettings::Tcp { .. } => {
                write!(f, "tcp://{}", self.socket_address().unwrap_or_default())
            },
            TransportSettings::Udp { .. } => {
                write!(f, "udp://{}", self.socket_address().unwrap_or_default())
            },
            TransportSettings::Serial(serial) => write!(
                f,
                "serial://{}?baud={}&format={}",
                serial.device,
                serial.baud_rate,
                serial.format()
            ),
        }
    }
}

fn default_transport() -> TransportSettings {
    TransportSettings::Tcp {
        host: "127.0.0.1".to_string(),
        port: 502,
    }
}
fn default_unit_address() -> u8 {
    1
}
fn default_retries() -> u32 {
    timeouts::DEFAULT_RETRIES
}
fn default_timeout_ms() -> u64 {
    timeouts::DEFAULT_TIMEOUT_MS
}
fn default_latency_ms() -> u64 {
    timeouts::DEFAULT_LATENCY_MS
}
fn default_idle_timeout_ms() -> u64 {
    timeouts::DEFAULT_IDLE_TIMEOUT_MS
}
fn default_poll_interval_ms() -> u64 {
    timeouts::DEFAULT_POLL_INTERVAL_MS
}
fn default_frame_gap_ms() -> u64 {
    timeouts::DEFAULT_FRAME_GAP_MS
}

/// Fieldbus endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldbusConfig {
    #[serde(default = "default_transport")]
    pub transport: TransportSettings,

    /// Defaults to the medium's usual framing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framing: Option<Framing>,

    #[serde(default = "default_unit_address")]
    pub unit_address: u8,

    /// Query attempts before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Stream sessions close after this long without a served frame; 0 disables
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Serial silence that drops a partial frame; 0 disables
    #[serde(default = "default_frame_gap_ms")]
    pub frame_gap_ms: u64,
}

impl Default for FieldbusConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            framing: None,
            unit_address: default_unit_address(),
            retries: default_retries(),
            timeout_ms: default_timeout_ms(),
            latency_ms: default_latency_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            frame_gap_ms: default_frame_gap_ms(),
        }
    }
}

impl FieldbusConfig {
    pub fn framing(&self) -> Framing {
        self.framing
            .unwrap_or_else(|| self.transport.default_framing())
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::new(self.framing(), self.unit_address)
    }

    pub fn query_policy(&self) -> QueryPolicy {
        QueryPolicy {
            retries: self.retries,
            timeout: Duration::from_millis(self.timeout_ms),
            latency: Duration::from_millis(self.latency_ms),
        }
    }

    /// Listener options for the configured medium
    pub fn listener_options(&self) -> ListenerOptions {
        let mut options = match self.transport {
            TransportSettings::Tcp { .. } => ListenerOptions::stream(),
            TransportSettings::Udp { .. } => ListenerOptions::datagram(),
            TransportSettings::Serial(_) => ListenerOptions::serial(),
        };
        options.poll_interval = Duration::from_millis(self.poll_interval_ms.max(1));
        options.max_frame = self.framing().max_frame();
        if options.idle_timeout.is_some() {
            options.idle_timeout =
                (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms));
        }
        if options.frame_gap.is_some() {
            options.frame_gap =
                (self.frame_gap_ms > 0).then(|| Duration::from_millis(self.frame_gap_ms));
        }
        options
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(FieldbusError::config("retries must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(FieldbusError::config("timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Server-side checks on top of [`validate`](Self::validate)
    pub fn validate_server(&self) -> Result<()> {
        self.validate()?;
        if !(1..=MAX_UNIT_ADDRESS).contains(&self.unit_address) {
            return Err(FieldbusError::config(format!(
                "unit_address {} outside 1..={}",
                self.unit_address, MAX_UNIT_ADDRESS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_socket_settings() {
        assert_eq!(
            "tcp://192.168.1.10:502".parse::<TransportSettings>().unwrap(),
            TransportSettings::Tcp {
                host: "192.168.1.10".to_string(),
                port: 502
            }
        );
        let udp: TransportSettings = "udp://[::1]:1502".parse().unwrap();
        assert_eq!(udp.socket_address().unwrap(), "[::1]:1502");
        assert_eq!(udp.to_string(), "udp://[::1]:1502");
    }

    #[test]
    fn test_parse_serial_settings() {
        let settings: TransportSettings = "serial:///dev/ttyUSB0?baud=19200&format=7E2"
            .parse()
            .unwrap();
        let TransportSettings::Serial(serial) = &settings else {
            panic!("expected serial settings");
        };
        assert_eq!(serial.device, "/dev/ttyUSB0");
        assert_eq!(serial.baud_rate, 19200);
        assert_eq!(serial.data_bits, 7);
        assert_eq!(serial.parity, Parity::Even);
        assert_eq!(serial.stop_bits, 2);
        assert_eq!(settings.default_framing(), Framing::Addressed);

        let plain: TransportSettings = "serial://COM3".parse().unwrap();
        assert_eq!(plain.to_string(), "serial://COM3?baud=9600&format=8N1");
    }

    #[test]
    fn test_parse_rejects_malformed_settings() {
        for bad in [
            "192.168.1.10:502",
            "tcp://nohost",
            "tcp://:502",
            "tcp://host:70000",
            "ftp://host:21",
            "serial://",
            "serial:///dev/ttyS0?baud=fast",
            "serial:///dev/ttyS0?format=9N1",
            "serial:///dev/ttyS0?parity=even",
        ] {
            let result = bad.parse::<TransportSettings>();
            assert!(
                matches!(result, Err(FieldbusError::Config(_))),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: FieldbusConfig =
            serde_yaml::from_str("transport: \"serial:///dev/ttyS1\"\nunit_address: 17\n").unwrap();
        assert_eq!(config.unit_address, 17);
        assert_eq!(config.retries, 3);
        assert_eq!(config.framing(), Framing::Addressed);
        assert_eq!(config.query_policy().timeout, Duration::from_millis(1000));
        assert_eq!(config.query_policy().latency, Duration::from_millis(50));

        let options = config.listener_options();
        assert_eq!(options.frame_gap, Some(Duration::from_millis(1000)));
        assert_eq!(options.max_frame, 256);
    }

    #[test]
    fn test_framing_override_and_alias() {
        let config: FieldbusConfig =
            serde_json::from_str(r#"{"transport":"tcp://127.0.0.1:1502","framing":"rtu"}"#).unwrap();
        assert_eq!(config.framing(), Framing::Addressed);
        assert_eq!(config.protocol().framing(), Framing::Addressed);
    }

    #[test]
    fn test_invalid_transport_is_config_error() {
        let result: std::result::Result<FieldbusConfig, _> =
            serde_json::from_str(r#"{"transport":"carrier-pigeon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_stream_listener_idle_timeout() {
        let mut config = FieldbusConfig::default();
        assert_eq!(
            config.listener_options().idle_timeout,
            Some(Duration::from_millis(10_000))
        );
        config.idle_timeout_ms = 0;
        assert_eq!(config.listener_options().idle_timeout, None);
    }

    #[test]
    fn test_validate_server_address() {
        let mut config = FieldbusConfig::default();
        assert!(config.validate_server().is_ok());
        config.unit_address = 0;
        assert!(config.validate_server().is_err());
        config.unit_address = 248;
        assert!(config.validate_server().is_err());
        config.unit_address = 247;
        config.retries = 0;
        assert!(matches!(config.validate(), Err(FieldbusError::Config(_))));
    }

    #[test]
    fn test_settings_serialize_as_string() {
        let config = FieldbusConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["transport"], "tcp://127.0.0.1:502");
    }
}
