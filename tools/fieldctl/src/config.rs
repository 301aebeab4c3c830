//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Command-line flags
//! 2. `FIELDCTL_`-prefixed environment variables (e.g. `FIELDCTL_UNIT_ADDRESS=3`)
//! 3. Config file given with `--config` (YAML, TOML or JSON by extension)
//! 4. Built-in defaults

use std::path::Path;

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::Serialize;
use voltage_fieldbus::{FieldbusConfig, Framing};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FIELDCTL_";

/// Values given on the command line; unset flags leave lower layers alone
#[derive(Debug, Clone, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framing: Option<Framing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_address: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Figment provider for a config file, chosen by extension
fn file_figment(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.exists() {
        bail!("Config file not found: {}", path.display());
    }
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .context("Config file must have an extension")?;

    Ok(match extension {
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "toml" => figment.merge(Toml::file(path)),
        "json" => figment.merge(Json::file(path)),
        other => bail!("Unsupported config file format: {}", other),
    })
}

/// Build the effective configuration
pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<FieldbusConfig> {
    let mut figment = Figment::new().merge(Serialized::defaults(FieldbusConfig::default()));
    if let Some(path) = path {
        figment = file_figment(figment, path)?;
    }
    let config: FieldbusConfig = figment
        .merge(Env::prefixed(ENV_PREFIX))
        .merge(Serialized::defaults(overrides))
        .extract()
        .context("Failed to load configuration")?;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
