//! CLI definition using clap derive.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use presence_core::PresenceConfig;

#[derive(Parser)]
#[command(name = "presence", about = "BLE beacon proximity presence engine")]
pub struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, short = 'c', global = true, env = "PRESENCE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Consume advertisements and emit presence events as NDJSON on stdout
    Run(RunOpts),
    /// Print the effective configuration as JSON
    Config,
    /// Decode one iBeacon advertisement and print the sample as JSON
    Decode(DecodeOpts),
}

#[derive(clap::Args)]
pub struct RunOpts {
    /// NDJSON advertisement input ("-" for stdin)
    #[arg(long, short = 'i', default_value = "-")]
    pub input: String,

    /// Override the configured collection point id
    #[arg(long)]
    pub collection_point_id: Option<String>,

    /// TOML table of `beacon_id = "category"` used for snapshot enrichment
    #[arg(long)]
    pub categories: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct DecodeOpts {
    /// Sender address as hex, radio byte order
    #[arg(long)]
    pub sender: String,

    /// Received signal strength in dBm
    #[arg(long, allow_hyphen_values = true)]
    pub rssi: i32,

    /// Advertisement payload as hex
    #[arg(long)]
    pub data: String,
}

/// Load and validate the config file, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<PresenceConfig> {
    match path {
        Some(path) => Ok(PresenceConfig::load(path)?),
        None => {
            tracing::debug!("no config file given, using defaults");
            Ok(PresenceConfig::default())
        }
    }
}
