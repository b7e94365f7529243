//! Shared types and utilities for the rfxcom2mqtt bridge:
//!
//! - [`config`] - Settings model and JSON5 loading
//! - [`topic`] - MQTT topic construction and matching
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod topic;

// Re-export commonly used types at the crate root
pub use config::{
    ConfigError, DeviceOverride, DiscoveryConfig, HealthcheckConfig, LogFormat, LoggingConfig,
    MqttConfig, RadioConfig, Settings, SettingsHandle, TlsConfig, UnitOverride,
};
pub use error::{BridgeError, CommandError, ConnectError, PersistError, PublishError, Result};
pub use topic::{TopicBuilder, parse_command_topic, topic_matches};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// # Example
///
/// ```ignore
/// use rfxcom2mqtt_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| BridgeError::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
