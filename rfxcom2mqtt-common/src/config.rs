//! Bridge configuration (JSON5 format).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// MQTT broker settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// RFXCOM transceiver settings
    #[serde(default)]
    pub radio: RadioConfig,

    /// Home Assistant discovery settings
    #[serde(default)]
    pub homeassistant: DiscoveryConfig,

    /// Periodic transceiver health check
    #[serde(default)]
    pub healthcheck: HealthcheckConfig,

    /// Per-device overrides (names, subtypes, repeat counts)
    #[serde(default)]
    pub devices: Vec<DeviceOverride>,

    /// Directory holding the persisted registry and state files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Seconds between background store snapshots
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_save_interval() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            radio: RadioConfig::default(),
            homeassistant: DiscoveryConfig::default(),
            healthcheck: HealthcheckConfig::default(),
            devices: Vec::new(),
            data_dir: default_data_dir(),
            save_interval_secs: default_save_interval(),
            logging: LoggingConfig::default(),
        }
    }
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host (IP or hostname)
    #[serde(default = "default_server")]
    pub server: String,

    /// Broker port (default: 1883, or 8883 when TLS is configured)
    #[serde(default)]
    pub port: Option<u16>,

    /// Username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Base topic for all bridge traffic
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Client identifier presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// QoS level for outgoing publications (0-2)
    #[serde(default)]
    pub qos: u8,

    /// Retain flag for device event publications
    #[serde(default)]
    pub retain: bool,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// TLS settings; presence switches the connection to TLS
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_server() -> String {
    "localhost".to_string()
}

fn default_base_topic() -> String {
    crate::topic::DEFAULT_BASE_TOPIC.to_string()
}

fn default_client_id() -> String {
    "rfxcom2mqtt".to_string()
}

fn default_keepalive() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: None,
            username: None,
            password: None,
            base_topic: default_base_topic(),
            client_id: default_client_id(),
            qos: 0,
            retain: false,
            keepalive_secs: default_keepalive(),
            tls: None,
        }
    }
}

impl MqttConfig {
    /// The configured port, or the standard port for the transport.
    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.tls.is_some() { 8883 } else { 1883 })
    }
}

/// TLS material for the broker connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// CA certificate (PEM)
    pub ca: PathBuf,

    /// Client certificate (PEM), for mutual TLS
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Client private key (PEM), for mutual TLS
    #[serde(default)]
    pub key: Option<PathBuf>,
}

/// RFXCOM transceiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0"), or "mock" for the scripted
    /// in-memory transceiver
    #[serde(default = "default_radio_port")]
    pub port: String,

    /// Log every frame exchanged with the transceiver
    #[serde(default)]
    pub debug: bool,

    /// Protocols to enable for reception; empty enables the default set
    #[serde(default)]
    pub receive: Vec<String>,

    /// Transmission settings
    #[serde(default)]
    pub transmit: TransmitConfig,
}

fn default_radio_port() -> String {
    "mock".to_string()
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: default_radio_port(),
            debug: false,
            receive: Vec::new(),
            transmit: TransmitConfig::default(),
        }
    }
}

/// Radio transmission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmitConfig {
    /// Number of times each command frame is transmitted
    #[serde(default = "default_repeat")]
    pub repeat: u8,
}

fn default_repeat() -> u8 {
    1
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            repeat: default_repeat(),
        }
    }
}

/// Home Assistant MQTT discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Publish discovery configs for detected entities
    #[serde(default = "default_true")]
    pub discovery: bool,

    /// Discovery prefix the Home Assistant instance listens on
    #[serde(default = "default_discovery_topic")]
    pub discovery_topic: String,

    /// Prefix for generated unique ids and object ids
    #[serde(default = "default_device_prefix")]
    pub device_prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_discovery_topic() -> String {
    "homeassistant".to_string()
}

fn default_device_prefix() -> String {
    "rfxcom2mqtt".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery: true,
            discovery_topic: default_discovery_topic(),
            device_prefix: default_device_prefix(),
        }
    }
}

/// Periodic transceiver health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// Enable the periodic check
    #[serde(default)]
    pub enabled: bool,

    /// Interval between checks in seconds
    #[serde(default = "default_healthcheck_interval")]
    pub interval_secs: u64,
}

fn default_healthcheck_interval() -> u64 {
    60
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_healthcheck_interval(),
        }
    }
}

/// Shutter direction convention for Somfy RFY devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlindsMode {
    /// European convention (up opens)
    #[default]
    Eu,
    /// US convention (directions reversed)
    Us,
}

/// Per-device configuration override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceOverride {
    /// Protocol device id (e.g. "0x011B2F")
    pub id: String,

    /// Name commands may address the device by, instead of its id
    #[serde(default)]
    pub name: Option<String>,

    /// Display name used in discovery entries
    #[serde(default)]
    pub friendly_name: Option<String>,

    /// Subtype applied to commands that do not carry one
    #[serde(default)]
    pub subtype: Option<String>,

    /// Frame repeat count for this device, overriding the radio default
    #[serde(default)]
    pub repetitions: Option<u8>,

    /// Direction convention for RFY shutters
    #[serde(default)]
    pub blinds_mode: Option<BlindsMode>,

    /// Per-unit overrides
    #[serde(default)]
    pub units: Vec<UnitOverride>,
}

/// Override for a single unit of a multi-unit device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitOverride {
    /// Unit code within the device (e.g. "1")
    pub unit_code: String,

    /// Name commands may address the unit by
    #[serde(default)]
    pub name: Option<String>,

    /// Display name used in discovery entries
    #[serde(default)]
    pub friendly_name: Option<String>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Settings {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = json5::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = json5::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.server.is_empty() {
            return Err(ConfigError::Validation(
                "mqtt.server cannot be empty".to_string(),
            ));
        }

        if self.mqtt.qos > 2 {
            return Err(ConfigError::Validation(format!(
                "mqtt.qos must be 0-2, got {}",
                self.mqtt.qos
            )));
        }

        if self.mqtt.base_topic.is_empty()
            || self.mqtt.base_topic.contains('+')
            || self.mqtt.base_topic.contains('#')
        {
            return Err(ConfigError::Validation(format!(
                "mqtt.base_topic must be a literal topic, got '{}'",
                self.mqtt.base_topic
            )));
        }

        if self.radio.port.is_empty() {
            return Err(ConfigError::Validation(
                "radio.port cannot be empty".to_string(),
            ));
        }

        if self.radio.transmit.repeat == 0 {
            return Err(ConfigError::Validation(
                "radio.transmit.repeat must be at least 1".to_string(),
            ));
        }

        for device in &self.devices {
            if device.id.is_empty() {
                return Err(ConfigError::Validation(
                    "devices[].id cannot be empty".to_string(),
                ));
            }

            if device.repetitions == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': repetitions must be at least 1",
                    device.id
                )));
            }
        }

        Ok(())
    }

    /// Find a device override by id or configured name.
    pub fn device_override(&self, id_or_name: &str) -> Option<&DeviceOverride> {
        self.devices
            .iter()
            .find(|d| d.id == id_or_name || d.name.as_deref() == Some(id_or_name))
    }
}

impl DeviceOverride {
    /// Find the override for a unit code, if any.
    pub fn unit(&self, unit_code: &str) -> Option<&UnitOverride> {
        self.units.iter().find(|u| u.unit_code == unit_code)
    }
}

/// Shared, updatable view of the settings.
///
/// Adapters snapshot the settings when they need them; updates take effect
/// on the next snapshot (or bridge restart for connection parameters).
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    /// Wrap settings in a shared handle.
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Clone the current settings.
    pub fn snapshot(&self) -> Settings {
        self.inner.read().unwrap().clone()
    }

    /// Apply a mutation to the settings.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.inner.write().unwrap();
        f(&mut settings);
    }
}
