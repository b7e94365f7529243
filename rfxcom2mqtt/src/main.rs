//! RFXCOM to MQTT bridge.
//!
//! Translates RFXtrx433 radio traffic into MQTT topics and back, with
//! optional Home Assistant discovery.

use anyhow::{Context, Result};
use clap::Parser;
use rfxcom2mqtt::BridgeController;
use rfxcom2mqtt_common::config::{Settings, SettingsHandle};
use rfxcom2mqtt_common::{LoggingConfig, init_tracing};
use std::path::PathBuf;
use tracing::info;

/// RFXCOM RFXtrx433 to MQTT bridge.
#[derive(Parser, Debug)]
#[command(name = "rfxcom2mqtt")]
#[command(about = "Bridges RFXCOM radio traffic to MQTT")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "config.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| settings.logging.level.clone()),
        format: settings.logging.format,
    };
    init_tracing(&log_config).map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Loaded configuration from {:?}", args.config);

    let controller =
        BridgeController::new(SettingsHandle::new(settings)).context("Failed to open data stores")?;

    controller.start().await.context("Failed to start bridge")?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    controller.stop().await;

    Ok(())
}
