//! fieldctl - Fieldbus operator tool for VoltageEMS
//!
//! Queries remote devices over TCP, UDP or serial lines and serves an
//! in-memory register bank for commissioning and testing.

mod bank;
mod config;
mod logging;
mod query;
mod serve;
mod shutdown;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use voltage_fieldbus::Framing;

use crate::bank::Presets;
use crate::config::CliOverrides;
use crate::query::{parse_bit, parse_u16, CoilState, Query, Table};

#[derive(Parser)]
#[command(name = "fieldctl")]
#[command(about = "Fieldbus operator tool - query devices and serve a register bank")]
#[command(long_about = "Fieldbus operator tool - query devices and serve a register bank

Transports:
  tcp://host:port                           Stream framing by default
  udp://host:port                           Stream framing by default
  serial://device?baud=9600&format=8N1      Addressed (CRC) framing by default

Examples:
  fieldctl -t tcp://192.168.1.10:502 read holding --offset 0 --count 10
  fieldctl -t serial:///dev/ttyUSB0 -u 3 write-register --offset 40 0x1F
  fieldctl -t tcp://0.0.0.0:1502 serve --size 1000
  fieldctl -t udp://0.0.0.0:1502 serve --input-registers 230,0x1F,12 --discrete-inputs 1,0,1

Settings may also come from a config file (--config) or FIELDCTL_* variables.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (YAML, TOML or JSON)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Transport settings string
    #[arg(short = 't', long, global = true)]
    transport: Option<String>,

    /// Unit address of the device (client) or of this node (serve)
    #[arg(short = 'u', long, global = true)]
    unit: Option<u8>,

    /// Framing: stream (tcp) or addressed (rtu)
    #[arg(long, global = true)]
    framing: Option<Framing>,

    /// Attempts per query
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Per-attempt response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Enable verbose logging (frame dumps)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read coils, discrete inputs, holding or input registers
    Read {
        #[arg(value_enum)]
        table: Table,

        #[arg(short, long, default_value_t = 0)]
        offset: u16,

        #[arg(short = 'n', long, default_value_t = 1)]
        count: u16,
    },

    /// Write one coil
    WriteCoil {
        #[arg(short, long)]
        offset: u16,

        #[arg(value_enum)]
        state: CoilState,
    },

    /// Write one holding register (decimal or 0x hex)
    WriteRegister {
        #[arg(short, long)]
        offset: u16,

        #[arg(value_parser = parse_u16)]
        value: u16,
    },

    /// Write consecutive coils (1/0, on/off, true/false)
    WriteCoils {
        #[arg(short, long)]
        offset: u16,

        #[arg(required = true, value_parser = parse_bit)]
        bits: Vec<bool>,
    },

    /// Write consecutive holding registers
    WriteRegisters {
        #[arg(short, long)]
        offset: u16,

        #[arg(required = true, value_parser = parse_u16)]
        values: Vec<u16>,
    },

    /// Serve an in-memory register bank until Ctrl+C
    Serve {
        /// Elements per table
        #[arg(long, default_value_t = 1000)]
        size: usize,

        /// Discrete inputs from offset 0, comma separated (1/0, on/off)
        #[arg(long, value_delimiter = ',', value_parser = parse_bit)]
        discrete_inputs: Vec<bool>,

        /// Input registers from offset 0, comma separated (decimal or 0x hex)
        #[arg(long, value_delimiter = ',', value_parser = parse_u16)]
        input_registers: Vec<u16>,
    },
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            transport: self.transport.clone(),
            framing: self.framing,
            unit_address: self.unit,
            retries: self.retries,
            timeout_ms: self.timeout_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    logging::init(cli.verbose, !cli.no_color);

    let config = match config::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "ERROR".bright_red(), e);
            std::process::exit(2);
        },
    };
    tracing::debug!("Effective configuration: {:?}", config);

    let query = match cli.command {
        Commands::Serve {
            size,
            discrete_inputs,
            input_registers,
        } => {
            let presets = Presets {
                discrete_inputs,
                input_registers,
            };
            return serve::run(&config, size, &presets).await;
        },
        Commands::Read {
            table,
            offset,
            count,
        } => Query::Read {
            table,
            offset,
            count,
        },
        Commands::WriteCoil { offset, state } => Query::WriteCoil {
            offset,
            on: state == CoilState::On,
        },
        Commands::WriteRegister { offset, value } => Query::WriteRegister { offset, value },
        Commands::WriteCoils { offset, bits } => Query::WriteCoils { offset, bits },
        Commands::WriteRegisters { offset, values } => Query::WriteRegisters { offset, values },
    };

    if let Err(e) = query::run(&config, query).await {
        eprintln!("{} {:#}", "ERROR".bright_red(), e);
        std::process::exit(1);
    }
    Ok(())
}
