//! MQTT broker adapter.
//!
//! Owns the rumqttc event loop and a listener registry. The loop reconnects
//! on its own; listeners are resubscribed on every CONNACK, so a broker
//! restart is invisible to the rest of the bridge apart from the
//! availability topic.

use rfxcom2mqtt_common::config::{MqttConfig, TlsConfig};
use rfxcom2mqtt_common::error::{ConnectError, PublishError};
use rfxcom2mqtt_common::topic::{TopicBuilder, topic_matches};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, Transport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// A message delivered to a subscribed listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publication options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub qos: u8,
    pub retain: bool,
}

impl PublishOptions {
    pub fn retained(qos: u8) -> Self {
        Self { qos, retain: true }
    }
}

struct Listener {
    id: u64,
    patterns: Vec<String>,
    sender: UnboundedSender<BrokerMessage>,
}

struct AdapterState {
    config: RwLock<MqttConfig>,
    topics: RwLock<TopicBuilder>,
    client: RwLock<Option<AsyncClient>>,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    listeners: RwLock<Vec<Listener>>,
    next_listener: AtomicU64,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the broker connection, cheap to clone.
#[derive(Clone)]
pub struct MqttAdapter {
    state: Arc<AdapterState>,
}

impl Default for MqttAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AdapterState {
                config: RwLock::new(MqttConfig::default()),
                topics: RwLock::new(TopicBuilder::new(
                    rfxcom2mqtt_common::topic::DEFAULT_BASE_TOPIC,
                )),
                client: RwLock::new(None),
                connected: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                poll_task: Mutex::new(None),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Connect to the broker and start the event loop.
    ///
    /// Only TLS material that cannot be read fails here; everything else is
    /// handled by the reconnecting loop. The availability topic flips to
    /// "online" once the broker acknowledges the session.
    pub async fn connect(&self, config: &MqttConfig) -> Result<(), ConnectError> {
        let topics = TopicBuilder::new(&config.base_topic);

        let mut options =
            MqttOptions::new(&config.client_id, &config.server, config.effective_port());
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs));
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            topics.bridge_state(),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or(""));
        }

        if let Some(tls) = &config.tls {
            options.set_transport(load_tls_transport(tls)?);
        }

        info!(
            "Connecting to MQTT broker {}:{} as '{}'",
            config.server,
            config.effective_port(),
            config.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        *self.state.config.write().unwrap() = config.clone();
        *self.state.topics.write().unwrap() = topics;
        *self.state.client.write().unwrap() = Some(client.clone());
        self.state.shutting_down.store(false, Ordering::Release);

        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        state.connected.store(true, Ordering::Release);
                        on_connack(&state, &client).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        dispatch(
                            &state.listeners.read().unwrap(),
                            &publish.topic,
                            &publish.payload,
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        state.connected.store(false, Ordering::Release);
                        if state.shutting_down.load(Ordering::Acquire) {
                            break;
                        }

                        let reason = match &err {
                            rumqttc::ConnectionError::ConnectionRefused(code) => {
                                ConnectError::Auth(format!("{:?}", code)).to_string()
                            }
                            other => ConnectError::Transport(other.to_string()).to_string(),
                        };
                        warn!(
                            "MQTT connection lost: {}; retrying in {}s",
                            reason,
                            RECONNECT_DELAY.as_secs()
                        );
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        if let Some(previous) = self.state.poll_task.lock().unwrap().replace(task) {
            previous.abort();
        }

        Ok(())
    }

    /// Register a listener for a set of topic patterns.
    ///
    /// Subscribes immediately when connected; otherwise the next CONNACK
    /// picks it up.
    pub async fn add_listener(
        &self,
        patterns: Vec<String>,
        sender: UnboundedSender<BrokerMessage>,
    ) -> u64 {
        let id = self.state.next_listener.fetch_add(1, Ordering::Relaxed);
        self.state.listeners.write().unwrap().push(Listener {
            id,
            patterns: patterns.clone(),
            sender,
        });

        if self.is_connected() {
            let client = self.state.client.read().unwrap().clone();
            if let Some(client) = client {
                let qos = subscription_qos(&self.state);
                for pattern in &patterns {
                    if let Err(err) = client.subscribe(pattern.clone(), qos).await {
                        warn!("Failed to subscribe to '{}': {}", pattern, err);
                    }
                }
            }
        }

        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.state.listeners.write().unwrap().retain(|l| l.id != id);
    }

    /// Publish a payload.
    ///
    /// With `with_base_prefix` the topic is placed under the configured base
    /// topic. While disconnected the publication is dropped with a debug
    /// log; device traffic is not worth buffering against a dead broker.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        options: PublishOptions,
        with_base_prefix: bool,
    ) -> Result<(), PublishError> {
        let full_topic = if with_base_prefix {
            self.state.topics.read().unwrap().prefixed(topic)
        } else {
            topic.to_string()
        };

        let client = self.state.client.read().unwrap().clone();
        let client = match client {
            Some(client) if self.is_connected() => client,
            _ => {
                debug!("Not connected, dropping publish to '{}'", full_topic);
                return Ok(());
            }
        };

        client
            .publish(
                full_topic.clone(),
                qos_level(options.qos),
                options.retain,
                payload.into(),
            )
            .await
            .map_err(|err| PublishError {
                topic: full_topic,
                message: err.to_string(),
            })
    }

    /// Publish retained "offline" and close the connection.
    pub async fn disconnect(&self) {
        self.state.shutting_down.store(true, Ordering::Release);

        if self.is_connected() {
            let topic = self.state.topics.read().unwrap().bridge_state();
            if let Err(err) = self
                .publish(&topic, "offline", PublishOptions::retained(1), false)
                .await
            {
                warn!("Failed to publish offline state: {}", err);
            }
        }

        let client = self.state.client.write().unwrap().take();
        if let Some(client) = client {
            let _ = client.disconnect().await;
        }

        if let Some(task) = self.state.poll_task.lock().unwrap().take() {
            task.abort();
        }
        self.state.connected.store(false, Ordering::Release);
        info!("Disconnected from MQTT broker");
    }

    /// Reconnect with a possibly updated configuration.
    pub async fn restart(&self, config: &MqttConfig) -> Result<(), ConnectError> {
        self.disconnect().await;
        self.connect(config).await
    }
}

async fn on_connack(state: &Arc<AdapterState>, client: &AsyncClient) {
    let topic = state.topics.read().unwrap().bridge_state();
    if let Err(err) = client
        .publish(topic, QoS::AtLeastOnce, true, "online")
        .await
    {
        warn!("Failed to publish online state: {}", err);
    }

    let qos = subscription_qos(state);
    let patterns: Vec<String> = {
        let listeners = state.listeners.read().unwrap();
        listeners
            .iter()
            .flat_map(|l| l.patterns.iter().cloned())
            .collect()
    };

    for pattern in patterns {
        debug!("Subscribing to '{}'", pattern);
        if let Err(err) = client.subscribe(pattern.clone(), qos).await {
            warn!("Failed to subscribe to '{}': {}", pattern, err);
        }
    }
}

fn subscription_qos(state: &AdapterState) -> QoS {
    qos_level(state.config.read().unwrap().qos)
}

fn dispatch(listeners: &[Listener], topic: &str, payload: &[u8]) {
    for listener in listeners {
        if listener
            .patterns
            .iter()
            .any(|pattern| topic_matches(pattern, topic))
        {
            let message = BrokerMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            };
            if listener.sender.send(message).is_err() {
                debug!("Listener {} dropped its receiver", listener.id);
            }
        }
    }
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

fn load_tls_transport(tls: &TlsConfig) -> Result<Transport, ConnectError> {
    let read = |path: &std::path::Path| {
        std::fs::read(path)
            .map_err(|err| ConnectError::Tls(format!("cannot read {}: {}", path.display(), err)))
    };

    let ca = read(&tls.ca)?;
    let client_auth = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => Some((read(cert)?, read(key)?)),
        _ => None,
    };

    Ok(Transport::tls(ca, client_auth, None))
}
