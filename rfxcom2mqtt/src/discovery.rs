//! Home Assistant MQTT discovery.
//!
//! Detects entities from normalized events, records their metadata on the
//! owning device and publishes retained discovery configs under the
//! configured discovery prefix. A synthetic bridge device exposes the
//! bridge's own availability and coordinator details.

use crate::event::{CoordinatorInfo, RadioEvent};
use crate::mqtt::{MqttAdapter, PublishOptions};
use crate::store::{BinarySensorMeta, CoverMeta, DeviceState, SensorMeta, SwitchMeta};
use rfxcom2mqtt_common::config::{DeviceOverride, DiscoveryConfig};
use rfxcom2mqtt_common::topic::{TopicBuilder, discovery_config_topic, topic_id};
use serde::Serialize;
use tracing::warn;

/// Home Assistant components the bridge announces.
pub const COMPONENTS: &[&str] = &["sensor", "binary_sensor", "switch", "cover", "select"];

#[derive(Debug, Clone, Serialize)]
struct Availability {
    topic: String,
}

#[derive(Debug, Clone, Serialize)]
struct DeviceBlock {
    identifiers: Vec<String>,
    name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,

    manufacturer: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct OriginBlock {
    name: &'static str,
    sw_version: &'static str,
    support_url: &'static str,
}

fn origin() -> OriginBlock {
    OriginBlock {
        name: "rfxcom2mqtt",
        sw_version: env!("CARGO_PKG_VERSION"),
        support_url: "https://github.com/rfxcom2mqtt/rfxcom2mqtt",
    }
}

/// One discovery config payload.
///
/// Common fields are always set; category-specific fields stay `None` and
/// are omitted from the JSON.
#[derive(Debug, Serialize)]
pub struct EntityConfig {
    availability: Vec<Availability>,
    device: DeviceBlock,
    origin: OriginBlock,
    name: String,
    unique_id: String,
    object_id: String,
    state_topic: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    json_attributes_topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    value_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    payload_on: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    payload_off: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    command_topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    payload_open: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    payload_close: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    payload_stop: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    position_topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    position_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Vec<String>>,
}

/// Generates and publishes discovery configs.
#[derive(Clone)]
pub struct DiscoveryGenerator {
    config: DiscoveryConfig,
    topics: TopicBuilder,
    mqtt: MqttAdapter,
}

impl DiscoveryGenerator {
    pub fn new(config: DiscoveryConfig, topics: TopicBuilder, mqtt: MqttAdapter) -> Self {
        Self {
            config,
            topics,
            mqtt,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.discovery
    }

    /// Announce the entities detectable from an event.
    ///
    /// Metadata is recorded on the device record so the registry reflects
    /// what was announced; the caller persists the device afterwards.
    pub async fn announce_event(
        &self,
        event: &RadioEvent,
        device: &mut DeviceState,
        device_config: Option<&DeviceOverride>,
    ) {
        if !self.enabled() {
            return;
        }

        for (component, object_id, config) in self.build_entity_configs(event, device, device_config)
        {
            self.publish_config(component, &object_id, &config).await;
        }
    }

    /// Announce the synthetic bridge device.
    pub async fn announce_bridge(&self, coordinator: Option<&CoordinatorInfo>) {
        if !self.enabled() {
            return;
        }

        for (component, object_id, config) in self.build_bridge_configs(coordinator) {
            self.publish_config(component, &object_id, &config).await;
        }
    }

    /// Retract every config ever published for a device.
    ///
    /// Empty retained payloads are sent for all known metadata keys plus a
    /// catch-all per component, so over-publishing is harmless.
    pub async fn unpublish_device(&self, device: &DeviceState) {
        for topic in self.removal_topics(device) {
            if let Err(err) = self
                .mqtt
                .publish(&topic, Vec::new(), PublishOptions::retained(1), false)
                .await
            {
                warn!("Failed to clear discovery config: {}", err);
            }
        }
    }

    fn build_entity_configs(
        &self,
        event: &RadioEvent,
        device: &mut DeviceState,
        device_config: Option<&DeviceOverride>,
    ) -> Vec<(&'static str, String, EntityConfig)> {
        let entity = event.entity_id();
        let tid = topic_id(&entity);
        let state_topic = self.topics.device(&event.topic_suffix());
        let block = self.device_block(device);
        let mut configs = Vec::new();

        device.add_entity(&entity);

        for meta in sensor_candidates(event) {
            let key = format!("{}_{}", tid, meta.property);
            let object_id = self.object_id(&key);

            let mut config = self.base_config(block.clone(), &meta.name, &object_id, &state_topic);
            config.json_attributes_topic = Some(state_topic.clone());
            config.value_template = Some(value_template(&meta.property));
            config.unit_of_measurement = meta.unit_of_measurement.clone();
            config.device_class = meta.device_class.clone();
            config.state_class = meta.state_class.clone();
            config.entity_category = meta.entity_category.clone();
            config.icon = meta.icon.clone();

            configs.push(("sensor", object_id, config));
            device.sensors.insert(key, meta);
        }

        if event.device_type.starts_with("lighting") {
            let key = format!("{}_switch", tid);
            let object_id = self.object_id(&key);
            let name = switch_name(event, device_config);

            // A group entity switches every unit at once; its commands go to
            // the bare device id.
            let (command_entity, on, off) = if event.is_group {
                (event.id.clone(), "Group On", "Group Off")
            } else {
                (event.topic_suffix(), "On", "Off")
            };

            let mut config = self.base_config(block.clone(), &name, &object_id, &state_topic);
            config.json_attributes_topic = Some(state_topic.clone());
            config.value_template = Some(value_template("command"));
            config.payload_on = Some(on.to_string());
            config.payload_off = Some(off.to_string());
            config.command_topic = Some(self.topics.command(&event.device_type, &command_entity));

            configs.push(("switch", object_id, config));
            device.switches.insert(
                key,
                SwitchMeta {
                    name,
                    property: "command".to_string(),
                    payload_on: on.to_string(),
                    payload_off: off.to_string(),
                },
            );
        }

        if event.device_type == "security1" {
            let key = format!("{}_status", tid);
            let object_id = self.object_id(&key);

            let mut config = self.base_config(block.clone(), "Motion", &object_id, &state_topic);
            config.json_attributes_topic = Some(state_topic.clone());
            config.value_template = Some(value_template("status"));
            config.payload_on = Some("Motion".to_string());
            config.payload_off = Some("NoMotion".to_string());
            config.device_class = Some("motion".to_string());

            configs.push(("binary_sensor", object_id, config));
            device.binary_sensors.insert(
                key,
                BinarySensorMeta {
                    name: "Motion".to_string(),
                    property: "status".to_string(),
                    payload_on: "Motion".to_string(),
                    payload_off: "NoMotion".to_string(),
                    device_class: Some("motion".to_string()),
                },
            );
        }

        if matches!(event.device_type.as_str(), "blinds1" | "rfy") {
            let key = format!("{}_cover", tid);
            let object_id = self.object_id(&key);
            let name = "Cover".to_string();

            let mut config = self.base_config(block.clone(), &name, &object_id, &state_topic);
            config.json_attributes_topic = Some(state_topic.clone());
            config.command_topic = Some(
                self.topics
                    .command(&event.device_type, &event.topic_suffix()),
            );
            config.payload_open = Some("Open".to_string());
            config.payload_close = Some("Close".to_string());
            config.payload_stop = Some("Stop".to_string());
            if event.level.is_some() {
                config.position_topic = Some(state_topic.clone());
                config.position_template = Some(value_template("level"));
            }

            configs.push(("cover", object_id, config));
            device.covers.insert(key, CoverMeta { name });
        }

        configs
    }

    fn build_bridge_configs(
        &self,
        coordinator: Option<&CoordinatorInfo>,
    ) -> Vec<(&'static str, String, EntityConfig)> {
        let block = DeviceBlock {
            identifiers: vec![format!("{}_bridge", self.config.device_prefix)],
            name: "RFXCOM bridge".to_string(),
            model: coordinator.map(|c| c.receiver_type.clone()),
            manufacturer: "RFXCOM",
        };
        let state = self.topics.bridge_state();
        let info = self.topics.bridge_info();
        let mut configs = Vec::new();

        let object_id = self.object_id("bridge_connectivity");
        let mut config = self.base_config(block.clone(), "Connectivity", &object_id, &state);
        config.payload_on = Some("online".to_string());
        config.payload_off = Some("offline".to_string());
        config.device_class = Some("connectivity".to_string());
        config.entity_category = Some("diagnostic".to_string());
        configs.push(("binary_sensor", object_id, config));

        let object_id = self.object_id("bridge_version");
        let mut config = self.base_config(block.clone(), "Version", &object_id, &info);
        config.value_template = Some(value_template("version"));
        config.entity_category = Some("diagnostic".to_string());
        configs.push(("sensor", object_id, config));

        let object_id = self.object_id("bridge_firmware");
        let mut config = self.base_config(block, "Firmware", &object_id, &info);
        config.value_template = Some("{{ value_json.coordinator.firmware_version }}".to_string());
        config.entity_category = Some("diagnostic".to_string());
        configs.push(("sensor", object_id, config));

        configs
    }

    fn removal_topics(&self, device: &DeviceState) -> Vec<String> {
        let mut topics = Vec::new();
        let mut push = |component: &str, key: &str| {
            topics.push(discovery_config_topic(
                &self.config.discovery_topic,
                component,
                &self.object_id(key),
            ));
        };

        for key in device.sensors.keys() {
            push("sensor", key);
        }
        for key in device.binary_sensors.keys() {
            push("binary_sensor", key);
        }
        for key in device.switches.keys() {
            push("switch", key);
        }
        for key in device.covers.keys() {
            push("cover", key);
        }
        for key in device.selects.keys() {
            push("select", key);
        }

        let device_key = topic_id(&device.id);
        for component in COMPONENTS {
            push(component, &device_key);
        }

        topics
    }

    fn object_id(&self, key: &str) -> String {
        format!("{}_{}", self.config.device_prefix, key)
    }

    fn device_block(&self, device: &DeviceState) -> DeviceBlock {
        DeviceBlock {
            identifiers: vec![format!("{}_{}", self.config.device_prefix, device.id)],
            name: device.name.clone(),
            model: device
                .subtype_label
                .clone()
                .or_else(|| Some(device.device_type.clone())),
            manufacturer: "RFXCOM",
        }
    }

    fn base_config(
        &self,
        device: DeviceBlock,
        name: &str,
        object_id: &str,
        state_topic: &str,
    ) -> EntityConfig {
        EntityConfig {
            availability: vec![Availability {
                topic: self.topics.bridge_state(),
            }],
            device,
            origin: origin(),
            name: name.to_string(),
            unique_id: object_id.to_string(),
            object_id: object_id.to_string(),
            state_topic: state_topic.to_string(),
            json_attributes_topic: None,
            value_template: None,
            unit_of_measurement: None,
            device_class: None,
            state_class: None,
            entity_category: None,
            icon: None,
            payload_on: None,
            payload_off: None,
            command_topic: None,
            payload_open: None,
            payload_close: None,
            payload_stop: None,
            position_topic: None,
            position_template: None,
            options: None,
        }
    }

    async fn publish_config(&self, component: &str, object_id: &str, config: &EntityConfig) {
        let topic = discovery_config_topic(&self.config.discovery_topic, component, object_id);

        match serde_json::to_vec(config) {
            Ok(payload) => {
                if let Err(err) = self
                    .mqtt
                    .publish(&topic, payload, PublishOptions::retained(1), false)
                    .await
                {
                    warn!("Failed to publish discovery config: {}", err);
                }
            }
            Err(err) => warn!("Cannot serialize discovery config: {}", err),
        }
    }
}

fn value_template(property: &str) -> String {
    format!("{{{{ value_json.{} }}}}", property)
}

fn sensor_candidates(event: &RadioEvent) -> Vec<SensorMeta> {
    let mut sensors = Vec::new();

    if event.temperature.is_some() {
        sensors.push(SensorMeta {
            name: "Temperature".to_string(),
            property: "temperature".to_string(),
            unit_of_measurement: Some("°C".to_string()),
            device_class: Some("temperature".to_string()),
            state_class: Some("measurement".to_string()),
            icon: None,
            entity_category: None,
        });
    }

    if event.humidity.is_some() {
        sensors.push(SensorMeta {
            name: "Humidity".to_string(),
            property: "humidity".to_string(),
            unit_of_measurement: Some("%".to_string()),
            device_class: Some("humidity".to_string()),
            state_class: Some("measurement".to_string()),
            icon: None,
            entity_category: None,
        });
    }

    if event.rssi.is_some() {
        sensors.push(SensorMeta {
            name: "Signal".to_string(),
            property: "rssi".to_string(),
            unit_of_measurement: Some("dBm".to_string()),
            device_class: Some("signal_strength".to_string()),
            state_class: Some("measurement".to_string()),
            icon: None,
            entity_category: Some("diagnostic".to_string()),
        });
    }

    if event.battery_level.is_some() {
        sensors.push(SensorMeta {
            name: "Battery".to_string(),
            property: "battery_level".to_string(),
            unit_of_measurement: Some("%".to_string()),
            device_class: Some("battery".to_string()),
            state_class: Some("measurement".to_string()),
            icon: None,
            entity_category: Some("diagnostic".to_string()),
        });
    }

    sensors
}

fn switch_name(event: &RadioEvent, device_config: Option<&DeviceOverride>) -> String {
    if let (Some(device), Some(unit)) = (device_config, event.unit_code.as_deref()) {
        if let Some(unit_config) = device.unit(unit) {
            if let Some(name) = unit_config
                .friendly_name
                .clone()
                .or_else(|| unit_config.name.clone())
            {
                return name;
            }
        }
    }

    if event.is_group {
        "Group".to_string()
    } else if let Some(unit) = &event.unit_code {
        format!("Switch {}", unit)
    } else {
        "Switch".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfxcom2mqtt_common::config::UnitOverride;

    fn generator() -> DiscoveryGenerator {
        DiscoveryGenerator::new(
            DiscoveryConfig::default(),
            TopicBuilder::new("rfxcom2mqtt"),
            MqttAdapter::new(),
        )
    }

    fn sensor_event() -> RadioEvent {
        let mut event = RadioEvent::new("temperaturehumidity1", 1, "0x6F01");
        event.temperature = Some(21.7);
        event.humidity = Some(58);
        event.rssi = Some(6);
        event.battery_level = Some(9);
        event
    }

    #[test]
    fn test_sensor_detection() {
        let generator = generator();
        let event = sensor_event();
        let mut device = DeviceState::from_event(&event);

        let configs = generator.build_entity_configs(&event, &mut device, None);

        let components: Vec<&str> = configs.iter().map(|(c, _, _)| *c).collect();
        assert_eq!(
            components,
            vec!["sensor", "sensor", "sensor", "sensor"]
        );
        assert!(device.sensors.contains_key("0x6F01_temperature"));
        assert!(device.sensors.contains_key("0x6F01_humidity"));
        assert!(device.sensors.contains_key("0x6F01_rssi"));
        assert!(device.sensors.contains_key("0x6F01_battery_level"));
        assert_eq!(device.entities, vec!["0x6F01"]);
    }

    #[test]
    fn test_detection_is_additive() {
        let generator = generator();
        let event = sensor_event();
        let mut device = DeviceState::from_event(&event);

        generator.build_entity_configs(&event, &mut device, None);
        generator.build_entity_configs(&event, &mut device, None);

        assert_eq!(device.sensors.len(), 4);
        assert_eq!(device.entities, vec!["0x6F01"]);
    }

    #[test]
    fn test_sensor_config_fields() {
        let generator = generator();
        let event = sensor_event();
        let mut device = DeviceState::from_event(&event);

        let configs = generator.build_entity_configs(&event, &mut device, None);
        let (_, object_id, config) = &configs[0];
        assert_eq!(object_id, "rfxcom2mqtt_0x6F01_temperature");

        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["state_topic"], "rfxcom2mqtt/devices/0x6F01");
        assert_eq!(json["json_attributes_topic"], "rfxcom2mqtt/devices/0x6F01");
        assert_eq!(json["unique_id"], "rfxcom2mqtt_0x6F01_temperature");
        assert_eq!(json["value_template"], "{{ value_json.temperature }}");
        assert_eq!(json["unit_of_measurement"], "°C");
        assert_eq!(json["device_class"], "temperature");
        assert_eq!(json["availability"][0]["topic"], "rfxcom2mqtt/bridge/state");
        assert_eq!(json["device"]["identifiers"][0], "rfxcom2mqtt_0x6F01");
        assert_eq!(json["device"]["manufacturer"], "RFXCOM");
        assert_eq!(json["origin"]["name"], "rfxcom2mqtt");
        assert!(json.get("payload_on").is_none());
        assert!(json.get("icon").is_none());
    }

    #[test]
    fn test_switch_detection() {
        let generator = generator();
        let event = RadioEvent::new("lighting2", 0, "0x011B2F3A")
            .with_unit_code("1")
            .with_command("On", 1);
        let mut device = DeviceState::from_event(&event);

        let configs = generator.build_entity_configs(&event, &mut device, None);
        let (component, object_id, config) = configs
            .iter()
            .find(|(c, _, _)| *c == "switch")
            .unwrap();

        assert_eq!(*component, "switch");
        assert_eq!(object_id, "rfxcom2mqtt_0x011B2F3A_1_switch");

        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["payload_on"], "On");
        assert_eq!(json["payload_off"], "Off");
        assert_eq!(
            json["command_topic"],
            "rfxcom2mqtt/command/lighting2/0x011B2F3A/1"
        );
        assert_eq!(json["state_topic"], "rfxcom2mqtt/devices/0x011B2F3A/1");
        assert!(device.switches.contains_key("0x011B2F3A_1_switch"));
    }

    #[test]
    fn test_group_switch_targets_bare_id() {
        let generator = generator();
        let event = RadioEvent::new("lighting2", 0, "0x011B2F3A")
            .with_unit_code("0")
            .with_command("Group On", 4);
        let mut device = DeviceState::from_event(&event);

        let configs = generator.build_entity_configs(&event, &mut device, None);
        let (_, _, config) = configs.iter().find(|(c, _, _)| *c == "switch").unwrap();

        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["payload_on"], "Group On");
        assert_eq!(json["payload_off"], "Group Off");
        assert_eq!(
            json["command_topic"],
            "rfxcom2mqtt/command/lighting2/0x011B2F3A"
        );
        assert_eq!(json["state_topic"], "rfxcom2mqtt/devices/0x011B2F3A");
        assert_eq!(device.entities, vec!["0x011B2F3A_group"]);
    }

    #[test]
    fn test_switch_name_from_unit_override() {
        let event = RadioEvent::new("lighting2", 0, "0x011B2F3A").with_unit_code("1");
        let device_config = DeviceOverride {
            id: "0x011B2F3A".to_string(),
            units: vec![UnitOverride {
                unit_code: "1".to_string(),
                name: Some("lamp".to_string()),
                friendly_name: Some("Desk lamp".to_string()),
            }],
            ..Default::default()
        };

        assert_eq!(switch_name(&event, Some(&device_config)), "Desk lamp");
        assert_eq!(switch_name(&event, None), "Switch 1");
    }

    #[test]
    fn test_security_binary_sensor() {
        let generator = generator();
        let mut event = RadioEvent::new("security1", 1, "0xABCDEF");
        event.status = Some("Motion".to_string());
        event.rssi = Some(7);
        event.battery_level = Some(9);
        let mut device = DeviceState::from_event(&event);

        let configs = generator.build_entity_configs(&event, &mut device, None);

        let components: Vec<&str> = configs.iter().map(|(c, _, _)| *c).collect();
        assert_eq!(components, vec!["sensor", "sensor", "binary_sensor"]);

        let (_, _, config) = configs.last().unwrap();
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["payload_on"], "Motion");
        assert_eq!(json["payload_off"], "NoMotion");
        assert_eq!(json["device_class"], "motion");
    }

    #[test]
    fn test_cover_detection() {
        let generator = generator();
        let mut event = RadioEvent::new("blinds1", 0, "0x1234AB")
            .with_unit_code("1")
            .with_command("Open", 0);
        event.level = Some(50);
        let mut device = DeviceState::from_event(&event);

        let configs = generator.build_entity_configs(&event, &mut device, None);
        let (_, _, config) = configs.iter().find(|(c, _, _)| *c == "cover").unwrap();

        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["payload_open"], "Open");
        assert_eq!(json["payload_close"], "Close");
        assert_eq!(json["payload_stop"], "Stop");
        assert_eq!(json["position_template"], "{{ value_json.level }}");
        assert_eq!(
            json["command_topic"],
            "rfxcom2mqtt/command/blinds1/0x1234AB/1"
        );
        assert!(device.covers.contains_key("0x1234AB_1_cover"));
    }

    #[test]
    fn test_bridge_device_configs() {
        let generator = generator();
        let coordinator = CoordinatorInfo {
            receiver_type: "433.92MHz transceiver".to_string(),
            hardware_version: "1.0".to_string(),
            firmware_version: 242,
            firmware_type: "Type1".to_string(),
            enabled_protocols: vec!["AC".to_string()],
        };

        let configs = generator.build_bridge_configs(Some(&coordinator));
        assert_eq!(configs.len(), 3);

        let (_, _, connectivity) = &configs[0];
        let json = serde_json::to_value(connectivity).unwrap();
        assert_eq!(json["device_class"], "connectivity");
        assert_eq!(json["state_topic"], "rfxcom2mqtt/bridge/state");
        assert_eq!(json["device"]["identifiers"][0], "rfxcom2mqtt_bridge");
        assert_eq!(json["device"]["model"], "433.92MHz transceiver");

        let (_, _, version) = &configs[1];
        let json = serde_json::to_value(version).unwrap();
        assert_eq!(json["state_topic"], "rfxcom2mqtt/bridge/info");
        assert_eq!(json["value_template"], "{{ value_json.version }}");
    }

    #[test]
    fn test_removal_topics_cover_all_components() {
        let generator = generator();
        let event = sensor_event();
        let mut device = DeviceState::from_event(&event);
        generator.build_entity_configs(&event, &mut device, None);

        let topics = generator.removal_topics(&device);

        assert!(topics.contains(
            &"homeassistant/sensor/rfxcom2mqtt_0x6F01_temperature/config".to_string()
        ));
        for component in COMPONENTS {
            assert!(
                topics.contains(&format!(
                    "homeassistant/{}/rfxcom2mqtt_0x6F01/config",
                    component
                ))
            );
        }
    }

    #[test]
    fn test_removal_topics_without_recorded_metadata() {
        let generator = generator();
        let device = DeviceState::from_event(&RadioEvent::new("lighting2", 0, "0xDEAD"));

        let topics = generator.removal_topics(&device);

        // Nothing recorded, still one catch-all per component
        assert_eq!(topics.len(), COMPONENTS.len());
        assert!(topics.contains(&"homeassistant/switch/rfxcom2mqtt_0xDEAD/config".to_string()));
    }
}
