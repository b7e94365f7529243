//! Normalized radio events and coordinator status.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized event received from the transceiver.
///
/// This is the transient record flowing from the radio to the broker; the
/// entity cache persists its JSON form as the entity's property bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RadioEvent {
    /// Protocol device family (e.g. "lighting2").
    #[serde(rename = "type")]
    pub device_type: String,

    /// Numeric subtype within the family.
    pub subtype: u8,

    /// Subtype display name, when the family defines one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype_label: Option<String>,

    /// Protocol-assigned device id (e.g. "0x011B2F3A").
    pub id: String,

    /// Unit code within the device, for multi-unit families.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<String>,

    /// Whether the command addresses all units of the device.
    #[serde(rename = "group", default)]
    pub is_group: bool,

    /// Command display name (e.g. "On").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Raw protocol command number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_number: Option<u8>,

    /// Dim/position level where the family reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,

    /// Received signal strength indicator (0-15).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<u8>,

    /// Battery level indicator (0-9).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,

    /// Temperature in degrees Celsius.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Relative humidity percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<u8>,

    /// Humidity status label ("Normal", "Comfort", "Dry", "Wet").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity_status: Option<String>,

    /// Security status label (e.g. "Motion", "NoMotion").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Raw code carried by lighting4 frames; doubles as the device identity
    /// for that family.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// Fields reported by the radio that have no dedicated column.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RadioEvent {
    /// Create an event with the identity fields set.
    pub fn new(device_type: impl Into<String>, subtype: u8, id: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            subtype,
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the unit code.
    pub fn with_unit_code(mut self, unit_code: impl Into<String>) -> Self {
        self.unit_code = Some(unit_code.into());
        self
    }

    /// Set the command name and number, deriving the group flag.
    pub fn with_command(mut self, command: impl Into<String>, number: u8) -> Self {
        self.command = Some(command.into());
        self.command_number = Some(number);
        self.is_group = is_group_command(&self.device_type, number);
        self
    }

    /// Resolve the effective identity.
    ///
    /// lighting4 carries no id field on the wire; its raw data code is the
    /// identity, so it is substituted here.
    pub fn normalize(&mut self) {
        if self.device_type == "lighting4" {
            if let Some(data) = &self.data {
                self.id = data.clone();
            }
        }
    }

    /// Whether the event carries a usable identity after normalization.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// The entity id this event addresses, shared with the entity cache.
    pub fn entity_id(&self) -> String {
        crate::store::entity_id(&self.id, self.unit_code.as_deref(), self.is_group)
    }

    /// Topic suffix for the device event publication.
    ///
    /// The unit code segment is appended only for non-group events; a group
    /// command addresses the whole device and publishes on the bare id.
    pub fn topic_suffix(&self) -> String {
        match &self.unit_code {
            Some(unit) if !self.is_group => format!("{}/{}", self.id, unit),
            _ => self.id.clone(),
        }
    }
}

/// Whether a command number addresses every unit of a device.
///
/// These mappings are protocol trivia fixed by the device families; they are
/// not derivable from the frame layout.
pub fn is_group_command(device_type: &str, command_number: u8) -> bool {
    match device_type {
        "lighting2" => matches!(command_number, 3 | 4),
        "lighting1" => matches!(command_number, 5 | 6),
        "lighting6" => matches!(command_number, 2 | 3),
        _ => false,
    }
}

/// Humidity status label reported by temperature/humidity sensors.
pub fn humidity_status_label(code: u8) -> &'static str {
    match code {
        1 => "Comfort",
        2 => "Dry",
        3 => "Wet",
        _ => "Normal",
    }
}

/// Security status label for security1 frames.
pub fn security_status_label(code: u8) -> String {
    match code {
        0x00 => "Normal".to_string(),
        0x01 => "NormalDelayed".to_string(),
        0x02 => "Alarm".to_string(),
        0x03 => "AlarmDelayed".to_string(),
        0x04 => "Motion".to_string(),
        0x05 => "NoMotion".to_string(),
        0x06 => "Panic".to_string(),
        0x07 => "EndPanic".to_string(),
        0x09 => "ArmAway".to_string(),
        0x0A => "ArmAwayDelayed".to_string(),
        0x0B => "ArmHome".to_string(),
        0x0C => "ArmHomeDelayed".to_string(),
        0x0D => "Disarm".to_string(),
        0x16 => "BatteryLow".to_string(),
        other => format!("Status{}", other),
    }
}

/// Transceiver availability as reported by an active status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransceiverStatus {
    Online,
    Offline,
}

impl TransceiverStatus {
    /// String form published on the bridge state topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransceiverStatus::Online => "online",
            TransceiverStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for TransceiverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity and capabilities reported by the coordinator hardware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorInfo {
    /// Receiver hardware class (e.g. "433.92MHz transceiver").
    pub receiver_type: String,

    /// Hardware version ("major.minor").
    pub hardware_version: String,

    /// Firmware version number.
    pub firmware_version: u32,

    /// Firmware build type.
    pub firmware_type: String,

    /// Protocols currently enabled for reception.
    pub enabled_protocols: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_group_command_table() {
        assert!(is_group_command("lighting2", 3));
        assert!(is_group_command("lighting2", 4));
        assert!(!is_group_command("lighting2", 1));

        assert!(is_group_command("lighting1", 5));
        assert!(is_group_command("lighting1", 6));
        assert!(!is_group_command("lighting1", 3));

        assert!(is_group_command("lighting6", 2));
        assert!(is_group_command("lighting6", 3));
        assert!(!is_group_command("lighting6", 0));

        assert!(!is_group_command("lighting5", 2));
        assert!(!is_group_command("security1", 4));
    }

    #[test]
    fn test_with_command_derives_group_flag() {
        let event = RadioEvent::new("lighting2", 0, "0x011B2F").with_command("Group On", 4);
        assert!(event.is_group);

        let event = RadioEvent::new("lighting2", 0, "0x011B2F").with_command("On", 1);
        assert!(!event.is_group);
    }

    #[test]
    fn test_topic_suffix() {
        let event = RadioEvent::new("lighting2", 0, "0x011B").with_unit_code("2");
        assert_eq!(event.topic_suffix(), "0x011B/2");

        let event = RadioEvent::new("lighting2", 0, "0x011B")
            .with_unit_code("2")
            .with_command("Group On", 4);
        assert_eq!(event.topic_suffix(), "0x011B");

        let event = RadioEvent::new("temperaturehumidity1", 1, "0x6F01");
        assert_eq!(event.topic_suffix(), "0x6F01");
    }

    #[test]
    fn test_normalize_lighting4() {
        let mut event = RadioEvent::new("lighting4", 0, "");
        event.data = Some("0x25D3A2".to_string());
        event.normalize();

        assert_eq!(event.id, "0x25D3A2");
        assert!(event.has_id());
    }

    #[test]
    fn test_normalize_leaves_other_families() {
        let mut event = RadioEvent::new("lighting2", 0, "0x011B2F");
        event.normalize();
        assert_eq!(event.id, "0x011B2F");
    }

    #[test]
    fn test_event_serialization_field_names() {
        let event = RadioEvent::new("lighting2", 0, "0x011B2F")
            .with_unit_code("1")
            .with_command("On", 1);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "lighting2");
        assert_eq!(json["id"], "0x011B2F");
        assert_eq!(json["unit_code"], "1");
        assert_eq!(json["group"], false);
        assert_eq!(json["command"], "On");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_humidity_status_labels() {
        assert_eq!(humidity_status_label(0), "Normal");
        assert_eq!(humidity_status_label(1), "Comfort");
        assert_eq!(humidity_status_label(2), "Dry");
        assert_eq!(humidity_status_label(3), "Wet");
    }

    #[test]
    fn test_security_status_labels() {
        assert_eq!(security_status_label(0x04), "Motion");
        assert_eq!(security_status_label(0x05), "NoMotion");
        assert_eq!(security_status_label(0x42), "Status66");
    }

    #[test]
    fn test_transceiver_status_display() {
        assert_eq!(TransceiverStatus::Online.to_string(), "online");
        assert_eq!(TransceiverStatus::Offline.to_string(), "offline");
    }
}
