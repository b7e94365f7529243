//! Error types for the bridge.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while establishing a connection to the broker or the
/// transceiver. These are retried by the owning adapter and never abort
/// the bridge.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The underlying transport could not be opened.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The broker rejected the credentials.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// TLS material could not be read or parsed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The transceiver did not answer the reset/status handshake.
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Errors raised while translating an inbound command into a radio frame.
///
/// Exactly one of these is returned to the orchestrator, which logs it and
/// drops the command. A failed command never transmits.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The device type is not in the command table.
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),

    /// No subtype in the payload and no configured override.
    #[error("No subtype for device '{0}': provide one in the payload or in the device configuration")]
    MissingSubtype(String),

    /// The function name is not valid for this device type.
    #[error("Function '{function}' is not supported by {device_type}")]
    InvalidFunction {
        device_type: String,
        function: String,
    },

    /// A payload that looked structured failed to parse.
    #[error("Malformed command payload: {0}")]
    MalformedPayload(String),

    /// The transceiver is not connected.
    #[error("Transceiver is not connected")]
    NotConnected,
}

/// Failure to hand a message to the broker adapter.
#[derive(Error, Debug)]
#[error("Failed to publish to {topic}: {message}")]
pub struct PublishError {
    pub topic: String,
    pub message: String,
}

/// Failure to write a store snapshot to disk. The in-memory state is kept.
#[derive(Error, Debug)]
#[error("Failed to persist {path}: {message}")]
pub struct PersistError {
    pub path: String,
    pub message: String,
}

/// Errors in the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Connection error.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Command translation error.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Publish error.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Store persistence error.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Input rejected by validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create an input validation error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = CommandError::UnknownDeviceType("lighting9".to_string());
        assert_eq!(err.to_string(), "Unknown device type: lighting9");

        let err = CommandError::InvalidFunction {
            device_type: "lighting2".to_string(),
            function: "warp".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Function 'warp' is not supported by lighting2"
        );
    }

    #[test]
    fn test_bridge_error_from_command() {
        let err: BridgeError = CommandError::NotConnected.into();
        assert_eq!(err.to_string(), "Transceiver is not connected");
    }

    #[test]
    fn test_publish_error_display() {
        let err = PublishError {
            topic: "rfxcom2mqtt/devices/0x011B".to_string(),
            message: "channel closed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to publish to rfxcom2mqtt/devices/0x011B: channel closed"
        );
    }
}
