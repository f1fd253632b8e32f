#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod telemetry;

use clap::Parser;
use config::{CliArgs, CliConfig};
use telemetry::init_telemetry;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    commands::run(config)
}

fn log_startup_info(config: &CliConfig) {
    if cfg!(debug_assertions) {
        tracing::debug!("Starting fanout with full config: {:#?}", config);
    } else {
        tracing::debug!(
            node_id = config.node_id,
            store = ?config.store,
            "Starting fanout"
        );
    }
}
