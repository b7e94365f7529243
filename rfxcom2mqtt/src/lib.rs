//! RFXCOM RFXtrx433 to MQTT bridge engine.
//!
//! - [`frame`] - wire codec for transceiver frames
//! - [`event`] - normalized radio events and coordinator status
//! - [`command`] - protocol command tables and frame preparation
//! - [`transceiver`] - serial/mock transceiver adapter
//! - [`mqtt`] - broker adapter
//! - [`store`] - JSON-backed device registry and entity state cache
//! - [`discovery`] - Home Assistant discovery generator
//! - [`bridge`] - orchestration and lifecycle

pub mod bridge;
pub mod command;
pub mod discovery;
pub mod event;
pub mod frame;
pub mod mqtt;
pub mod store;
pub mod transceiver;

// Re-export the engine surface at the crate root
pub use bridge::{BridgeAction, BridgeController, BridgeInfo, BridgeState};
pub use event::{CoordinatorInfo, RadioEvent, TransceiverStatus};
pub use mqtt::{BrokerMessage, MqttAdapter, PublishOptions};
pub use store::{DeviceState, JsonStore};
pub use transceiver::RfxTransceiver;
