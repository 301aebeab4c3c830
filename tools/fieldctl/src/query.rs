//! Client-side subcommands

use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use voltage_fieldbus::transport::{self, StreamTransport};
use voltage_fieldbus::{Client, FieldbusConfig};

/// Data table addressed by `read`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Table {
    Coils,
    Discretes,
    Holding,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CoilState {
    On,
    Off,
}

/// One client operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Read { table: Table, offset: u16, count: u16 },
    WriteCoil { offset: u16, on: bool },
    WriteRegister { offset: u16, value: u16 },
    WriteCoils { offset: u16, bits: Vec<bool> },
    WriteRegisters { offset: u16, values: Vec<u16> },
}

/// Parse a register value in decimal or `0x` hex
pub fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{s}' is not a 16-bit value: {e}"))
}

/// Parse a bit as `1`/`0`, `on`/`off` or `true`/`false`
pub fn parse_bit(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(format!("'{s}' is not a bit (use 1/0, on/off, true/false)")),
    }
}

/// Connect, run one query and print the outcome
pub async fn run(config: &FieldbusConfig, query: Query) -> Result<()> {
    let transport = transport::connect(&config.transport, Duration::from_millis(config.timeout_ms))
        .await
        .with_context(|| format!("Failed to open {}", config.transport))?;
    let client = Client::new(transport, config.protocol(), config.query_policy());

    let result = execute(&client, &query).await;
    if let Err(e) = client.close().await {
        tracing::debug!("Close failed: {}", e);
    }
    result.with_context(|| format!("Query to unit {} on {} failed", config.unit_address, config.transport))
}

async fn execute<T: StreamTransport>(client: &Client<T>, query: &Query) -> Result<()> {
    match query {
        Query::Read { table, offset, count } => {
            let (offset, count) = (*offset, *count);
            match table {
                Table::Coils => print_bits(offset, &client.read_coils(offset, count).await?),
                Table::Discretes => {
                    print_bits(offset, &client.read_discrete_inputs(offset, count).await?)
                },
                Table::Holding => {
                    print_registers(offset, &client.read_holding_registers(offset, count).await?)
                },
                Table::Input => {
                    print_registers(offset, &client.read_input_registers(offset, count).await?)
                },
            }
        },
        Query::WriteCoil { offset, on } => {
            client.write_single_coil(*offset, *on).await?;
            print_ok(&format!("coil {} set {}", offset, if *on { "ON" } else { "OFF" }));
        },
        Query::WriteRegister { offset, value } => {
            client.write_single_register(*offset, *value).await?;
            print_ok(&format!("register {} = {}", offset, value));
        },
        Query::WriteCoils { offset, bits } => {
            client.write_multiple_coils(*offset, bits).await?;
            print_ok(&format!("{} coils written from {}", bits.len(), offset));
        },
        Query::WriteRegisters { offset, values } => {
            client.write_multiple_registers(*offset, values).await?;
            print_ok(&format!("{} registers written from {}", values.len(), offset));
        },
    }
    Ok(())
}

fn print_ok(message: &str) {
    println!("{} {}", "OK".bright_green(), message);
}

fn print_bits(offset: u16, bits: &[bool]) {
    println!("{:>7}  {}", "Address".bright_cyan(), "Value".bright_cyan());
    for (i, &on) in bits.iter().enumerate() {
        let value = if on { "1".bright_green() } else { "0".dimmed() };
        println!("{:>7}  {}", usize::from(offset) + i, value);
    }
}

fn print_registers(offset: u16, values: &[u16]) {
    println!(
        "{:>7}  {:>6}  {:>6}",
        "Address".bright_cyan(),
        "Value".bright_cyan(),
        "Hex".bright_cyan()
    );
    for (i, value) in values.iter().enumerate() {
        println!(
            "{:>7}  {:>6}  {}",
            usize::from(offset) + i,
            value,
            format!("0x{value:04X}").bright_yellow()
        );
    }
}
