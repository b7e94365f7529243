//! Bridge orchestration.
//!
//! `BridgeController` wires the transceiver, the broker adapter, the stores
//! and the discovery generator together. All inputs funnel into one channel
//! consumed by a single task, so store updates and publishes for an entity
//! are strictly ordered.

use crate::discovery::DiscoveryGenerator;
use crate::event::{CoordinatorInfo, RadioEvent};
use crate::mqtt::{BrokerMessage, MqttAdapter, PublishOptions};
use crate::store::{DeviceState, JsonStore, spawn_persist_task};
use crate::transceiver::RfxTransceiver;
use rfxcom2mqtt_common::config::{Settings, SettingsHandle};
use rfxcom2mqtt_common::error::BridgeError;
use rfxcom2mqtt_common::topic::{TopicBuilder, parse_command_topic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Administrative action accepted by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BridgeAction {
    /// Action on the bridge itself: `restart`, `stop`, `reset_devices`
    /// or `reset_state`.
    Bridge { action: String },
    /// Action on a known device, injected as a command for one of its
    /// entities.
    Device {
        device_id: String,
        entity_id: String,
        action: String,
    },
}

/// Runtime details published retained to `bridge/info`.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeInfo {
    pub version: String,
    pub log_level: String,
    pub coordinator: Option<CoordinatorInfo>,
}

/// Everything the processing loop consumes.
#[derive(Debug)]
pub enum BridgeInput {
    Radio(RadioEvent),
    Broker(BrokerMessage),
    Status(CoordinatorInfo),
    RadioDisconnect,
}

/// Orchestrates the radio and broker adapters.
pub struct BridgeController {
    settings: SettingsHandle,
    mqtt: MqttAdapter,
    transceiver: RfxTransceiver,
    registry: Arc<JsonStore>,
    cache: Arc<JsonStore>,
    state: StdRwLock<BridgeState>,
    info: Arc<StdRwLock<BridgeInfo>>,
    input: StdMutex<Option<mpsc::Sender<BridgeInput>>>,
    listener_id: StdMutex<Option<u64>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl BridgeController {
    /// Create a stopped controller, opening the stores under the
    /// configured data directory.
    pub fn new(settings: SettingsHandle) -> Result<Self, BridgeError> {
        let snapshot = settings.snapshot();
        let registry = Arc::new(JsonStore::open(snapshot.data_dir.join("devices.json"))?);
        let cache = Arc::new(JsonStore::open(snapshot.data_dir.join("state.json"))?);
        let info = BridgeInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: snapshot.logging.level.clone(),
            coordinator: None,
        };

        Ok(Self {
            mqtt: MqttAdapter::new(),
            transceiver: RfxTransceiver::new(snapshot.radio.clone()),
            registry,
            cache,
            state: StdRwLock::new(BridgeState::Stopped),
            info: Arc::new(StdRwLock::new(info)),
            input: StdMutex::new(None),
            listener_id: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            settings,
        })
    }

    /// Start the bridge. Does nothing unless it is stopped.
    pub async fn start(&self) -> Result<(), BridgeError> {
        {
            let mut state = self.state.write().unwrap();
            if !matches!(*state, BridgeState::Stopped) {
                return Ok(());
            }
            *state = BridgeState::Starting;
        }

        self.run_startup().await
    }

    /// Stop the bridge. Does nothing unless it is running.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().unwrap();
            if matches!(*state, BridgeState::Stopped | BridgeState::Stopping) {
                return;
            }
            *state = BridgeState::Stopping;
        }

        self.teardown().await;
        *self.state.write().unwrap() = BridgeState::Stopped;
        info!("Bridge stopped");
    }

    /// Tear everything down and start again with current settings.
    pub async fn restart(&self) -> Result<(), BridgeError> {
        info!("Restarting bridge");
        *self.state.write().unwrap() = BridgeState::Starting;
        self.teardown().await;
        self.run_startup().await
    }

    /// Execute an administrative action.
    pub async fn execute_action(&self, action: BridgeAction) -> Result<(), BridgeError> {
        match action {
            BridgeAction::Bridge { action } => self.execute_bridge_action(&action).await,
            BridgeAction::Device {
                device_id,
                entity_id,
                action,
            } => {
                self.execute_device_action(&device_id, &entity_id, &action)
                    .await
            }
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read().unwrap()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), BridgeState::Running)
    }

    pub fn bridge_info(&self) -> BridgeInfo {
        self.info.read().unwrap().clone()
    }

    /// The radio adapter, for status queries.
    pub fn transceiver(&self) -> &RfxTransceiver {
        &self.transceiver
    }

    /// A device from the registry.
    pub fn device(&self, id: &str) -> Option<DeviceState> {
        self.registry.get_as(id)
    }

    /// Every device in the registry.
    pub fn devices(&self) -> Vec<DeviceState> {
        self.registry
            .get_all()
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value(value).ok())
            .collect()
    }

    /// Last published state of an entity.
    pub fn entity_state(&self, entity_id: &str) -> Option<Value> {
        self.cache.get(entity_id)
    }

    /// Last published state of every entity.
    pub fn entity_states(&self) -> Map<String, Value> {
        self.cache.get_all()
    }

    async fn run_startup(&self) -> Result<(), BridgeError> {
        match self.startup().await {
            Ok(()) => {
                *self.state.write().unwrap() = BridgeState::Running;
                info!("Bridge running");
                Ok(())
            }
            Err(err) => {
                *self.state.write().unwrap() = BridgeState::Stopped;
                Err(err)
            }
        }
    }

    async fn startup(&self) -> Result<(), BridgeError> {
        let settings = self.settings.snapshot();
        let topics = TopicBuilder::new(&settings.mqtt.base_topic);
        let save_interval = Duration::from_secs(settings.save_interval_secs.max(1));
        let healthcheck = settings.healthcheck.clone();

        {
            let mut info = self.info.write().unwrap();
            info.log_level = settings.logging.level.clone();
        }
        info!(
            "Starting rfxcom2mqtt bridge v{}",
            env!("CARGO_PKG_VERSION")
        );

        self.mqtt.connect(&settings.mqtt).await?;

        let (input_tx, input_rx) = mpsc::channel(1000);
        let mut tasks = Vec::new();

        // Inbound commands
        let (broker_tx, mut broker_rx) = mpsc::unbounded_channel();
        let listener_id = self
            .mqtt
            .add_listener(vec![topics.command_wildcard()], broker_tx)
            .await;
        *self.listener_id.lock().unwrap() = Some(listener_id);
        let tx = input_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = broker_rx.recv().await {
                if tx.send(BridgeInput::Broker(message)).await.is_err() {
                    break;
                }
            }
        }));

        // Radio events
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        self.transceiver.subscribe_events(event_tx);
        let tx = input_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if tx.send(BridgeInput::Radio(event)).await.is_err() {
                    break;
                }
            }
        }));

        // Coordinator status
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        self.transceiver.subscribe_status(status_tx);
        let tx = input_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(coordinator) = status_rx.recv().await {
                if tx.send(BridgeInput::Status(coordinator)).await.is_err() {
                    break;
                }
            }
        }));

        // Radio disconnects
        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
        self.transceiver.subscribe_disconnects(disconnect_tx);
        let tx = input_tx.clone();
        tasks.push(tokio::spawn(async move {
            while disconnect_rx.recv().await.is_some() {
                if tx.send(BridgeInput::RadioDisconnect).await.is_err() {
                    break;
                }
            }
        }));

        // Single consumer keeps per-entity updates ordered
        let worker = Worker {
            discovery: DiscoveryGenerator::new(
                settings.homeassistant.clone(),
                topics.clone(),
                self.mqtt.clone(),
            ),
            topics,
            mqtt: self.mqtt.clone(),
            transceiver: self.transceiver.clone(),
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            info: Arc::clone(&self.info),
            settings,
        };
        tasks.push(tokio::spawn(worker.run(input_rx)));

        let transceiver = self.transceiver.clone();
        tasks.push(tokio::spawn(async move {
            transceiver.connect_with_retry().await;
        }));

        tasks.push(spawn_persist_task(Arc::clone(&self.registry), save_interval));
        tasks.push(spawn_persist_task(Arc::clone(&self.cache), save_interval));

        if healthcheck.enabled {
            tasks.push(spawn_health_task(
                self.transceiver.clone(),
                self.mqtt.clone(),
                Duration::from_secs(healthcheck.interval_secs.max(1)),
            ));
        }

        publish_bridge_info(&self.mqtt, &self.bridge_info()).await;

        *self.input.lock().unwrap() = Some(input_tx);
        *self.tasks.lock().unwrap() = tasks;

        Ok(())
    }

    async fn teardown(&self) {
        if let Some(id) = self.listener_id.lock().unwrap().take() {
            self.mqtt.remove_listener(id);
        }
        self.input.lock().unwrap().take();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in &tasks {
            task.abort();
        }

        if let Err(err) = self.registry.persist() {
            warn!("Failed to flush device registry: {}", err);
        }
        if let Err(err) = self.cache.persist() {
            warn!("Failed to flush state cache: {}", err);
        }

        self.mqtt.disconnect().await;
        self.transceiver.disconnect().await;
    }

    async fn execute_bridge_action(&self, action: &str) -> Result<(), BridgeError> {
        info!("Executing bridge action '{}'", action);

        match action {
            "restart" => self.restart().await,
            "stop" => {
                self.stop().await;
                Ok(())
            }
            "reset_devices" => self.reset_devices().await,
            "reset_state" => {
                self.cache.reset()?;
                Ok(())
            }
            other => Err(BridgeError::validation(format!(
                "Unknown bridge action '{}'",
                other
            ))),
        }
    }

    async fn reset_devices(&self) -> Result<(), BridgeError> {
        let settings = self.settings.snapshot();
        let discovery = DiscoveryGenerator::new(
            settings.homeassistant.clone(),
            TopicBuilder::new(&settings.mqtt.base_topic),
            self.mqtt.clone(),
        );

        for id in self.registry.keys() {
            if let Some(device) = self.registry.get_as::<DeviceState>(&id) {
                discovery.unpublish_device(&device).await;
            }
        }

        self.registry.reset()?;
        Ok(())
    }

    async fn execute_device_action(
        &self,
        device_id: &str,
        entity_id: &str,
        action: &str,
    ) -> Result<(), BridgeError> {
        if action.is_empty() {
            return Err(BridgeError::validation("Device action is empty"));
        }

        let Some(device) = self.registry.get_as::<DeviceState>(device_id) else {
            return Err(BridgeError::validation(format!(
                "Unknown device '{}'",
                device_id
            )));
        };

        let entity = if entity_id.is_empty() {
            device.id.clone()
        } else {
            entity_id.to_string()
        };
        let settings = self.settings.snapshot();
        let topic =
            TopicBuilder::new(&settings.mqtt.base_topic).command(&device.device_type, &entity);

        let sender = self.input.lock().unwrap().clone();
        let Some(sender) = sender else {
            return Err(BridgeError::validation("Bridge is not running"));
        };

        info!("Executing device action '{}' on {}", action, entity);
        sender
            .send(BridgeInput::Broker(BrokerMessage {
                topic,
                payload: action.as_bytes().to_vec(),
            }))
            .await
            .map_err(|_| BridgeError::validation("Bridge is not running"))
    }
}

/// The single consumer of [`BridgeInput`].
struct Worker {
    settings: Settings,
    topics: TopicBuilder,
    mqtt: MqttAdapter,
    transceiver: RfxTransceiver,
    discovery: DiscoveryGenerator,
    registry: Arc<JsonStore>,
    cache: Arc<JsonStore>,
    info: Arc<StdRwLock<BridgeInfo>>,
}

impl Worker {
    async fn run(self, mut inputs: mpsc::Receiver<BridgeInput>) {
        while let Some(input) = inputs.recv().await {
            self.handle(input).await;
        }
    }

    async fn handle(&self, input: BridgeInput) {
        match input {
            BridgeInput::Radio(event) => self.handle_radio_event(event).await,
            BridgeInput::Broker(message) => self.handle_broker_message(message).await,
            BridgeInput::Status(coordinator) => self.handle_status(coordinator).await,
            BridgeInput::RadioDisconnect => self.handle_radio_disconnect().await,
        }
    }

    async fn handle_radio_event(&self, mut event: RadioEvent) {
        event.normalize();
        if !event.has_id() {
            warn!("Dropping {} event without device id", event.device_type);
            return;
        }

        let entity = event.entity_id();
        debug!("Radio event {} for {}", event.device_type, entity);

        let device_config = self.settings.device_override(&event.id);
        let mut device = match self.registry.get_as::<DeviceState>(&event.id) {
            Some(existing) => existing,
            None => {
                let mut device = DeviceState::from_event(&event);
                if let Some(config) = device_config {
                    if let Some(name) = config
                        .friendly_name
                        .clone()
                        .or_else(|| config.name.clone())
                    {
                        device.name = name;
                    }
                }
                info!("Discovered device {} ({})", device.id, device.device_type);
                device
            }
        };
        device.last_seen = chrono::Utc::now();

        match serde_json::to_value(&event) {
            Ok(value) => self.cache.set(&entity, value),
            Err(err) => warn!("Cannot serialize state for {}: {}", entity, err),
        }

        self.discovery
            .announce_event(&event, &mut device, device_config)
            .await;

        match serde_json::to_value(&device) {
            Ok(value) => self.registry.set(&event.id, value),
            Err(err) => warn!("Cannot serialize device {}: {}", event.id, err),
        }

        let options = PublishOptions {
            qos: self.settings.mqtt.qos,
            retain: self.settings.mqtt.retain,
        };
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                let topic = format!("devices/{}", event.topic_suffix());
                if let Err(err) = self.mqtt.publish(&topic, payload, options, true).await {
                    warn!("Failed to publish state for {}: {}", entity, err);
                }
            }
            Err(err) => warn!("Cannot serialize event for {}: {}", entity, err),
        }
    }

    async fn handle_broker_message(&self, message: BrokerMessage) {
        let Some(command) = parse_command_topic(self.topics.base(), &message.topic) else {
            warn!("Ignoring message on unexpected topic {}", message.topic);
            return;
        };

        // The first segment may be a configured device name instead of an id.
        let key = command
            .entity_name
            .split('/')
            .next()
            .unwrap_or(&command.entity_name)
            .to_string();
        let device_config = self.settings.device_override(&key);

        let entity = match device_config {
            Some(config) if config.id != key => match command.entity_name.split_once('/') {
                Some((_, unit)) => format!("{}/{}", config.id, unit),
                None => config.id.clone(),
            },
            _ => command.entity_name.clone(),
        };

        if let Err(err) = self
            .transceiver
            .send_command(command.device_type, &entity, &message.payload, device_config)
            .await
        {
            error!("Command on {} failed: {}", message.topic, err);
        }
    }

    async fn handle_status(&self, coordinator: CoordinatorInfo) {
        debug!(
            "Coordinator {} firmware {}",
            coordinator.receiver_type, coordinator.firmware_version
        );

        let snapshot = {
            let mut info = self.info.write().unwrap();
            info.coordinator = Some(coordinator.clone());
            info.clone()
        };

        publish_bridge_info(&self.mqtt, &snapshot).await;
        self.discovery.announce_bridge(Some(&coordinator)).await;
    }

    async fn handle_radio_disconnect(&self) {
        warn!("Transceiver connection lost");
        if let Err(err) = self
            .mqtt
            .publish("bridge/state", "offline", PublishOptions::retained(1), true)
            .await
        {
            warn!("Failed to publish bridge state: {}", err);
        }
    }
}

async fn publish_bridge_info(mqtt: &MqttAdapter, info: &BridgeInfo) {
    match serde_json::to_vec(info) {
        Ok(payload) => {
            if let Err(err) = mqtt
                .publish("bridge/info", payload, PublishOptions::retained(1), true)
                .await
            {
                warn!("Failed to publish bridge info: {}", err);
            }
        }
        Err(err) => warn!("Cannot serialize bridge info: {}", err),
    }
}

fn spawn_health_task(
    transceiver: RfxTransceiver,
    mqtt: MqttAdapter,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; the transceiver is still
        // connecting then.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let status = transceiver.status().await;
            debug!("Health check: transceiver {}", status);
            if let Err(err) = mqtt
                .publish(
                    "bridge/state",
                    status.as_str(),
                    PublishOptions::retained(1),
                    true,
                )
                .await
            {
                warn!("Failed to publish bridge state: {}", err);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfxcom2mqtt_common::config::DeviceOverride;

    fn test_worker(dir: &std::path::Path) -> Worker {
        let settings = Settings::default();
        let topics = TopicBuilder::new(&settings.mqtt.base_topic);
        let mqtt = MqttAdapter::new();

        Worker {
            discovery: DiscoveryGenerator::new(
                settings.homeassistant.clone(),
                topics.clone(),
                mqtt.clone(),
            ),
            topics,
            mqtt,
            transceiver: RfxTransceiver::new(settings.radio.clone()),
            registry: Arc::new(JsonStore::open(dir.join("devices.json")).unwrap()),
            cache: Arc::new(JsonStore::open(dir.join("state.json")).unwrap()),
            info: Arc::new(StdRwLock::new(BridgeInfo {
                version: "test".to_string(),
                log_level: "info".to_string(),
                coordinator: None,
            })),
            settings,
        }
    }

    fn sensor_event() -> RadioEvent {
        let mut event = RadioEvent::new("temperaturehumidity1", 1, "0x6F01");
        event.temperature = Some(21.7);
        event.humidity = Some(58);
        event.rssi = Some(6);
        event
    }

    #[test]
    fn test_bridge_action_parsing() {
        let action: BridgeAction =
            serde_json::from_str(r#"{"kind": "bridge", "action": "restart"}"#).unwrap();
        assert!(matches!(action, BridgeAction::Bridge { ref action } if action == "restart"));

        let action: BridgeAction = serde_json::from_str(
            r#"{"kind": "device", "device_id": "0x6F01", "entity_id": "0x6F01", "action": "On"}"#,
        )
        .unwrap();
        assert!(
            matches!(action, BridgeAction::Device { ref device_id, .. } if device_id == "0x6F01")
        );
    }

    #[tokio::test]
    async fn test_radio_event_populates_stores() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());

        worker.handle(BridgeInput::Radio(sensor_event())).await;

        let device: DeviceState = worker.registry.get_as("0x6F01").unwrap();
        assert_eq!(device.device_type, "temperaturehumidity1");
        assert_eq!(device.entities, vec!["0x6F01"]);
        assert!(device.sensors.contains_key("0x6F01_temperature"));

        let state = worker.cache.get("0x6F01").unwrap();
        assert_eq!(state["temperature"], 21.7);
        assert_eq!(state["humidity"], 58);
    }

    #[tokio::test]
    async fn test_radio_event_redelivery_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());

        worker.handle(BridgeInput::Radio(sensor_event())).await;
        let mut second = sensor_event();
        second.temperature = Some(22.4);
        worker.handle(BridgeInput::Radio(second)).await;

        // Same entity, the later reading wins
        assert_eq!(worker.registry.len(), 1);
        assert_eq!(worker.cache.len(), 1);
        let state = worker.cache.get("0x6F01").unwrap();
        assert_eq!(state["temperature"], 22.4);
    }

    #[tokio::test]
    async fn test_radio_event_without_id_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());

        let event = RadioEvent::new("lighting4", 0, "");
        worker.handle(BridgeInput::Radio(event)).await;

        assert!(worker.registry.is_empty());
        assert!(worker.cache.is_empty());
    }

    #[tokio::test]
    async fn test_registry_identity_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());

        let mut first = DeviceState::from_event(&sensor_event());
        first.name = "Hallway sensor".to_string();
        worker
            .registry
            .set("0x6F01", serde_json::to_value(&first).unwrap());

        worker.handle(BridgeInput::Radio(sensor_event())).await;

        let device: DeviceState = worker.registry.get_as("0x6F01").unwrap();
        assert_eq!(device.name, "Hallway sensor");
    }

    #[tokio::test]
    async fn test_status_updates_bridge_info() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());

        let coordinator = CoordinatorInfo {
            receiver_type: "433.92MHz transceiver".to_string(),
            firmware_version: 242,
            ..Default::default()
        };
        worker.handle(BridgeInput::Status(coordinator)).await;

        let info = worker.info.read().unwrap();
        assert_eq!(
            info.coordinator.as_ref().unwrap().receiver_type,
            "433.92MHz transceiver"
        );
    }

    #[tokio::test]
    async fn test_broker_message_transmits_command() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());
        worker.transceiver.connect().await.unwrap();
        let before = worker.transceiver.sent_frames().len();

        worker
            .handle(BridgeInput::Broker(BrokerMessage {
                topic: "rfxcom2mqtt/command/lighting2/0x011B2F3A/1".to_string(),
                payload: br#"{"command": "On", "subtype": "AC"}"#.to_vec(),
            }))
            .await;

        assert_eq!(worker.transceiver.sent_frames().len(), before + 1);
    }

    #[tokio::test]
    async fn test_broker_message_on_foreign_topic_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());
        worker.transceiver.connect().await.unwrap();
        let before = worker.transceiver.sent_frames().len();

        worker
            .handle(BridgeInput::Broker(BrokerMessage {
                topic: "other/command/lighting2/0x011B2F3A/1".to_string(),
                payload: b"On".to_vec(),
            }))
            .await;

        assert_eq!(worker.transceiver.sent_frames().len(), before);
    }

    #[tokio::test]
    async fn test_broker_message_resolves_device_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = test_worker(dir.path());
        worker.settings.devices.push(DeviceOverride {
            id: "0x011B2F3A".to_string(),
            name: Some("lamp".to_string()),
            subtype: Some("AC".to_string()),
            ..Default::default()
        });
        worker.transceiver.connect().await.unwrap();
        let before = worker.transceiver.sent_frames().len();

        worker
            .handle(BridgeInput::Broker(BrokerMessage {
                topic: "rfxcom2mqtt/command/lighting2/lamp/1".to_string(),
                payload: b"On".to_vec(),
            }))
            .await;

        let sent = worker.transceiver.sent_frames();
        assert_eq!(sent.len(), before + 1);
        assert_eq!(&sent[before].data[..4], &[0x01, 0x1B, 0x2F, 0x3A]);
    }

    #[tokio::test]
    async fn test_unknown_command_is_logged_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let worker = test_worker(dir.path());
        worker.transceiver.connect().await.unwrap();
        let before = worker.transceiver.sent_frames().len();

        worker
            .handle(BridgeInput::Broker(BrokerMessage {
                topic: "rfxcom2mqtt/command/lighting2/0x011B2F3A/1".to_string(),
                payload: b"On".to_vec(),
            }))
            .await;

        // No subtype known for the device, so nothing was transmitted.
        assert_eq!(worker.transceiver.sent_frames().len(), before);
    }

    #[tokio::test]
    async fn test_execute_action_validates_device() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsHandle::new(Settings {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let controller = BridgeController::new(settings).unwrap();

        let result = controller
            .execute_action(BridgeAction::Device {
                device_id: "0xDEAD".to_string(),
                entity_id: String::new(),
                action: "On".to_string(),
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_action_rejects_unknown_bridge_action() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsHandle::new(Settings {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let controller = BridgeController::new(settings).unwrap();

        let result = controller
            .execute_action(BridgeAction::Bridge {
                action: "explode".to_string(),
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reset_state_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsHandle::new(Settings {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let controller = BridgeController::new(settings).unwrap();
        controller.cache.set("0x6F01", serde_json::json!({"temperature": 21.7}));

        controller
            .execute_action(BridgeAction::Bridge {
                action: "reset_state".to_string(),
            })
            .await
            .unwrap();

        assert!(controller.cache.is_empty());
    }
}
