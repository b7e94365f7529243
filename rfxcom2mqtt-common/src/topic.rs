//! MQTT topic construction and matching.
//!
//! All bridge traffic lives under a configurable base topic:
//!
//! - `<base>/bridge/state` - retained availability marker (`online`/`offline`)
//! - `<base>/bridge/info` - retained bridge and coordinator metadata
//! - `<base>/devices/<id>[/<unit>]` - translated radio events
//! - `<base>/command/<device_type>/<entity>[/<unit>]` - inbound commands

/// Default base topic for all bridge traffic.
pub const DEFAULT_BASE_TOPIC: &str = "rfxcom2mqtt";

/// Builder for bridge topics under a base topic.
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    base: String,
}

impl TopicBuilder {
    /// Create a builder for a base topic.
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The base topic itself.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Topic carrying the retained availability marker.
    ///
    /// # Example
    /// ```
    /// use rfxcom2mqtt_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("rfxcom2mqtt");
    /// assert_eq!(topics.bridge_state(), "rfxcom2mqtt/bridge/state");
    /// ```
    pub fn bridge_state(&self) -> String {
        format!("{}/bridge/state", self.base)
    }

    /// Topic carrying retained bridge and coordinator metadata.
    pub fn bridge_info(&self) -> String {
        format!("{}/bridge/info", self.base)
    }

    /// Topic for a translated radio event.
    ///
    /// The suffix is the entity id, which already contains the unit code
    /// segment when one applies.
    ///
    /// # Example
    /// ```
    /// use rfxcom2mqtt_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("rfxcom2mqtt");
    /// assert_eq!(topics.device("0x011B/1"), "rfxcom2mqtt/devices/0x011B/1");
    /// ```
    pub fn device(&self, suffix: &str) -> String {
        format!("{}/devices/{}", self.base, suffix)
    }

    /// Subscription pattern covering every inbound command.
    pub fn command_wildcard(&self) -> String {
        format!("{}/command/#", self.base)
    }

    /// Command topic for a device type and entity.
    ///
    /// # Example
    /// ```
    /// use rfxcom2mqtt_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("rfxcom2mqtt");
    /// assert_eq!(
    ///     topics.command("lighting2", "0x011B/1"),
    ///     "rfxcom2mqtt/command/lighting2/0x011B/1"
    /// );
    /// ```
    pub fn command(&self, device_type: &str, entity: &str) -> String {
        format!("{}/command/{}/{}", self.base, device_type, entity)
    }

    /// Prefix an arbitrary suffix with the base topic.
    pub fn prefixed(&self, suffix: &str) -> String {
        format!("{}/{}", self.base, suffix)
    }
}

/// Build the retained config topic for a Home Assistant discovery entry.
///
/// # Example
/// ```
/// use rfxcom2mqtt_common::topic::discovery_config_topic;
///
/// assert_eq!(
///     discovery_config_topic("homeassistant", "sensor", "0x011B_1_temperature"),
///     "homeassistant/sensor/0x011B_1_temperature/config"
/// );
/// ```
pub fn discovery_config_topic(prefix: &str, component: &str, object_id: &str) -> String {
    format!("{}/{}/{}/config", prefix, component, object_id)
}

/// Flatten an entity id into a single topic segment.
///
/// Entity ids may contain a unit-code segment (`0x011B/1`); discovery object
/// ids must be a single segment, so the separator becomes an underscore.
pub fn topic_id(entity_id: &str) -> String {
    entity_id.replace('/', "_")
}

/// Parsed components of an inbound command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic<'a> {
    /// Protocol device type, e.g. `lighting2`.
    pub device_type: &'a str,
    /// Entity name or id, unit-code segment included when present.
    pub entity_name: String,
}

/// Parse `<base>/command/<device_type>/<entity...>` into its components.
///
/// Returns `None` when the topic is not under the base topic, is not a
/// command topic, or names no entity.
///
/// # Example
/// ```
/// use rfxcom2mqtt_common::topic::parse_command_topic;
///
/// let cmd = parse_command_topic("rfxcom2mqtt", "rfxcom2mqtt/command/lighting2/0x011B/1").unwrap();
/// assert_eq!(cmd.device_type, "lighting2");
/// assert_eq!(cmd.entity_name, "0x011B/1");
/// ```
pub fn parse_command_topic<'a>(base: &str, topic: &'a str) -> Option<CommandTopic<'a>> {
    let suffix = topic.strip_prefix(base)?.strip_prefix('/')?;
    let parts: Vec<&str> = suffix.split('/').collect();

    if parts.len() < 3 || parts[0] != "command" {
        return None;
    }

    Some(CommandTopic {
        device_type: parts[1],
        entity_name: parts[2..].join("/"),
    })
}

/// Match a topic against an MQTT subscription pattern.
///
/// `+` matches exactly one level, `#` matches the remaining levels and is
/// only honoured in final position. A `#` also matches its own parent, so
/// `a/#` matches `a` itself.
///
/// # Example
/// ```
/// use rfxcom2mqtt_common::topic::topic_matches;
///
/// assert!(topic_matches("rfxcom2mqtt/command/#", "rfxcom2mqtt/command/lighting2/0x011B"));
/// assert!(topic_matches("rfxcom2mqtt/devices/+", "rfxcom2mqtt/devices/0x011B"));
/// assert!(!topic_matches("rfxcom2mqtt/devices/+", "rfxcom2mqtt/devices/0x011B/1"));
/// ```
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
