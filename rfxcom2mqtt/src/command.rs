//! Inbound command translation.
//!
//! Maps a command topic plus payload onto a transmit frame. Each device
//! family carries its own command and subtype tables; a handful of families
//! need more than the table (dimming levels, venetian blinds modes) and get
//! a dedicated preparation path.

use crate::frame::{self, Frame};
use rfxcom2mqtt_common::config::{BlindsMode, DeviceOverride};
use rfxcom2mqtt_common::error::CommandError;
use serde::Deserialize;

/// Pulse width sent with raw lighting4 data when the payload gives none.
const DEFAULT_LIGHTING4_PULSE: u16 = 350;

/// One transmissible device family.
struct Family {
    name: &'static str,
    packet_type: u8,
    /// Identity width in bytes.
    id_bytes: usize,
    has_unit_code: bool,
    /// Function name to protocol command number.
    commands: &'static [(&'static str, u8)],
    /// Subtype names, indexed by subtype number.
    subtypes: &'static [&'static str],
}

const FAMILIES: &[Family] = &[
    Family {
        name: "lighting1",
        packet_type: frame::PACKET_LIGHTING1,
        id_bytes: 1,
        has_unit_code: true,
        commands: &[
            ("Off", 0),
            ("On", 1),
            ("Dim", 2),
            ("Bright", 3),
            ("Group Off", 5),
            ("Group On", 6),
            ("Chime", 7),
        ],
        subtypes: &[
            "X10",
            "ARC",
            "ELRO",
            "WAVEMAN",
            "CHACON",
            "IMPULS",
            "RISINGSUN",
            "PHILIPS",
            "ENERGENIE",
            "ENERGENIE5",
            "COCO",
            "HQ",
        ],
    },
    Family {
        name: "lighting2",
        packet_type: frame::PACKET_LIGHTING2,
        id_bytes: 4,
        has_unit_code: true,
        commands: &[
            ("Off", 0),
            ("On", 1),
            ("Set Level", 2),
            ("Group Off", 3),
            ("Group On", 4),
            ("Set Group Level", 5),
        ],
        subtypes: &["AC", "HOMEEASY_EU", "ANSLUT", "KAMBROOK"],
    },
    Family {
        name: "lighting4",
        packet_type: frame::PACKET_LIGHTING4,
        id_bytes: 3,
        has_unit_code: false,
        commands: &[("Send Data", 0)],
        subtypes: &["PT2262"],
    },
    Family {
        name: "lighting5",
        packet_type: frame::PACKET_LIGHTING5,
        id_bytes: 3,
        has_unit_code: true,
        commands: &[("Off", 0), ("On", 1), ("Group Off", 2), ("Set Level", 0x10)],
        subtypes: &[
            "LIGHTWAVERF",
            "EMW100",
            "BBSB",
            "MDREMOTE",
            "CONRAD",
            "LIVOLO",
            "TRC02",
            "AOKE",
            "TRC02_2",
            "EURODOMEST",
        ],
    },
    Family {
        name: "lighting6",
        packet_type: frame::PACKET_LIGHTING6,
        id_bytes: 2,
        has_unit_code: true,
        commands: &[("On", 0), ("Off", 1), ("Group On", 2), ("Group Off", 3)],
        subtypes: &["BLYSS", "CUVEO"],
    },
    Family {
        name: "blinds1",
        packet_type: frame::PACKET_BLINDS1,
        id_bytes: 3,
        has_unit_code: true,
        commands: &[
            ("Open", 0),
            ("Close", 1),
            ("Stop", 2),
            ("Confirm", 3),
            ("Set Limit", 4),
        ],
        subtypes: &[
            "BLINDS_T0",
            "BLINDS_T1",
            "BLINDS_T2",
            "BLINDS_T3",
            "BLINDS_T4",
            "BLINDS_T5",
            "BLINDS_T6",
            "BLINDS_T7",
        ],
    },
    Family {
        name: "rfy",
        packet_type: frame::PACKET_RFY,
        id_bytes: 3,
        has_unit_code: true,
        commands: &[("Stop", 0), ("Up", 1), ("Down", 3), ("Program", 7)],
        subtypes: &["RFY", "RFYEXT", "ASA"],
    },
];

fn family(device_type: &str) -> Option<&'static Family> {
    FAMILIES.iter().find(|f| f.name.eq_ignore_ascii_case(device_type))
}

/// Whether a device type names a known family.
pub fn is_known_type(device_type: &str) -> bool {
    family(device_type).is_some()
}

/// Canonical function name for a protocol command number.
pub fn command_name(device_type: &str, number: u8) -> Option<&'static str> {
    family(device_type)?
        .commands
        .iter()
        .find(|(_, n)| *n == number)
        .map(|(name, _)| *name)
}

/// Subtype name for a subtype number.
pub fn subtype_name(device_type: &str, subtype: u8) -> Option<&'static str> {
    family(device_type)?.subtypes.get(subtype as usize).copied()
}

fn subtype_by_name(family: &Family, name: &str) -> Option<u8> {
    family
        .subtypes
        .iter()
        .position(|n| n.eq_ignore_ascii_case(name))
        .map(|idx| idx as u8)
}

/// A command to translate, as received from the broker.
pub struct CommandRequest<'a> {
    pub device_type: &'a str,
    /// Canonical entity name, `id` or `id/unit`.
    pub entity: &'a str,
    pub payload: &'a [u8],
    pub device: Option<&'a DeviceOverride>,
    pub default_repeat: u8,
}

/// A frame ready to transmit, with its repeat count.
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    pub frame: Frame,
    pub repeats: u8,
    /// Canonical function name, kept for logging.
    pub command: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommandPayload {
    command: Option<String>,
    subtype: Option<SubtypeRef>,
    level: Option<u8>,
    pulse: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubtypeRef {
    Number(u8),
    Name(String),
}

/// Translate a command request into a transmit frame.
///
/// Any error means nothing is transmitted.
pub fn prepare(request: &CommandRequest<'_>, sequence: u8) -> Result<PreparedCommand, CommandError> {
    let family = family(request.device_type)
        .ok_or_else(|| CommandError::UnknownDeviceType(request.device_type.to_string()))?;

    let payload = parse_payload(request.payload)?;
    let subtype = resolve_subtype(family, &payload, request)?;

    match family.name {
        "lighting4" => prepare_raw(family, request, &payload, subtype, sequence),
        "lighting5" => prepare_dimmer(family, request, &payload, subtype, sequence),
        "blinds1" => prepare_blinds(family, request, &payload, subtype, sequence),
        "rfy" => prepare_shutter(family, request, &payload, subtype, sequence),
        _ => prepare_default(family, request, &payload, subtype, sequence),
    }
}

fn parse_payload(raw: &[u8]) -> Result<CommandPayload, CommandError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CommandError::MalformedPayload("payload is not valid UTF-8".to_string()))?;
    let text = text.trim();

    if text.starts_with('{') {
        serde_json::from_str(text)
            .map_err(|err| CommandError::MalformedPayload(format!("invalid JSON payload: {}", err)))
    } else {
        Ok(CommandPayload {
            command: Some(text.to_string()),
            ..Default::default()
        })
    }
}

fn resolve_subtype(
    family: &Family,
    payload: &CommandPayload,
    request: &CommandRequest<'_>,
) -> Result<u8, CommandError> {
    if let Some(reference) = &payload.subtype {
        return match reference {
            SubtypeRef::Number(n) => Ok(*n),
            SubtypeRef::Name(name) => subtype_by_name(family, name)
                .ok_or_else(|| CommandError::MissingSubtype(request.entity.to_string())),
        };
    }

    if let Some(text) = request.device.and_then(|d| d.subtype.as_deref()) {
        if let Ok(n) = text.parse::<u8>() {
            return Ok(n);
        }
        if let Some(n) = subtype_by_name(family, text) {
            return Ok(n);
        }
    }

    Err(CommandError::MissingSubtype(request.entity.to_string()))
}

fn resolve_function(family: &Family, name: &str) -> Result<(&'static str, u8), CommandError> {
    family
        .commands
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(n, number)| (*n, *number))
        .ok_or_else(|| CommandError::InvalidFunction {
            device_type: family.name.to_string(),
            function: name.to_string(),
        })
}

fn function_name(payload: &CommandPayload) -> &str {
    payload.command.as_deref().unwrap_or("")
}

fn repeats(request: &CommandRequest<'_>) -> u8 {
    request
        .device
        .and_then(|d| d.repetitions)
        .unwrap_or(request.default_repeat)
        .max(1)
}

fn split_entity(entity: &str) -> (&str, Option<&str>) {
    match entity.split_once('/') {
        Some((id, unit)) => (id, Some(unit)),
        None => (entity, None),
    }
}

fn parse_id_bytes(id: &str, width: usize) -> Result<Vec<u8>, CommandError> {
    let digits = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);

    if digits.is_empty() {
        return Err(CommandError::MalformedPayload(format!(
            "empty device id '{}'",
            id
        )));
    }

    let value = u64::from_str_radix(digits, 16)
        .map_err(|_| CommandError::MalformedPayload(format!("invalid device id '{}'", id)))?;

    if width < 8 && value >> (width * 8) != 0 {
        return Err(CommandError::MalformedPayload(format!(
            "device id '{}' does not fit in {} bytes",
            id, width
        )));
    }

    Ok((0..width)
        .rev()
        .map(|shift| (value >> (shift * 8)) as u8)
        .collect())
}

fn parse_unit(unit: Option<&str>) -> Result<u8, CommandError> {
    match unit {
        // Group commands address the whole id and carry unit 0.
        None => Ok(0),
        Some(text) => text
            .parse::<u8>()
            .map_err(|_| CommandError::MalformedPayload(format!("invalid unit code '{}'", text))),
    }
}

fn build(
    family: &Family,
    request: &CommandRequest<'_>,
    subtype: u8,
    sequence: u8,
    command: (&'static str, u8),
    level: u8,
) -> Result<PreparedCommand, CommandError> {
    let (id_part, unit_part) = split_entity(request.entity);
    let id = parse_id_bytes(id_part, family.id_bytes)?;
    let unit = parse_unit(unit_part)?;

    let mut data = id;
    match family.packet_type {
        frame::PACKET_LIGHTING1 => data.extend_from_slice(&[unit, command.1, 0]),
        frame::PACKET_LIGHTING2 => data.extend_from_slice(&[unit, command.1, level, 0]),
        frame::PACKET_LIGHTING5 => data.extend_from_slice(&[unit, command.1, level, 0]),
        // House code byte is fixed; the two id bytes address the remote.
        frame::PACKET_LIGHTING6 => data.extend_from_slice(&[0x41, unit, command.1, 0, 0, 0]),
        frame::PACKET_BLINDS1 => data.extend_from_slice(&[unit, command.1, 0]),
        frame::PACKET_RFY => data.extend_from_slice(&[unit, command.1, 0, 0, 0, 0]),
        other => {
            return Err(CommandError::UnknownDeviceType(format!(
                "packet type 0x{:02X}",
                other
            )));
        }
    }

    Ok(PreparedCommand {
        frame: Frame::new(family.packet_type, subtype, sequence, data),
        repeats: repeats(request),
        command: command.0.to_string(),
    })
}

fn prepare_default(
    family: &Family,
    request: &CommandRequest<'_>,
    payload: &CommandPayload,
    subtype: u8,
    sequence: u8,
) -> Result<PreparedCommand, CommandError> {
    let command = resolve_function(family, function_name(payload))?;

    let level = if command.0 == "Set Level" || command.0 == "Set Group Level" {
        required_level(payload, command.0, 15)?
    } else {
        0
    };

    build(family, request, subtype, sequence, command, level)
}

fn required_level(payload: &CommandPayload, function: &str, max: u8) -> Result<u8, CommandError> {
    payload
        .level
        .map(|level| level.min(max))
        .ok_or_else(|| CommandError::MalformedPayload(format!("missing level for {}", function)))
}

/// Raw lighting4 data: the entity id is the transmitted data itself.
fn prepare_raw(
    family: &Family,
    request: &CommandRequest<'_>,
    payload: &CommandPayload,
    subtype: u8,
    sequence: u8,
) -> Result<PreparedCommand, CommandError> {
    let (id_part, _) = split_entity(request.entity);
    let mut data = parse_id_bytes(id_part, family.id_bytes)?;

    let pulse = payload.pulse.unwrap_or(DEFAULT_LIGHTING4_PULSE);
    data.extend_from_slice(&[(pulse >> 8) as u8, pulse as u8, 0]);

    Ok(PreparedCommand {
        frame: Frame::new(family.packet_type, subtype, sequence, data),
        repeats: repeats(request),
        command: "Send Data".to_string(),
    })
}

fn prepare_dimmer(
    family: &Family,
    request: &CommandRequest<'_>,
    payload: &CommandPayload,
    subtype: u8,
    sequence: u8,
) -> Result<PreparedCommand, CommandError> {
    let command = resolve_function(family, function_name(payload))?;

    let level = if command.0 == "Set Level" {
        required_level(payload, command.0, 31)?
    } else {
        0
    };

    build(family, request, subtype, sequence, command, level)
}

fn prepare_blinds(
    family: &Family,
    request: &CommandRequest<'_>,
    payload: &CommandPayload,
    subtype: u8,
    sequence: u8,
) -> Result<PreparedCommand, CommandError> {
    let name = function_name(payload);
    let command = match name.to_ascii_lowercase().as_str() {
        "open" | "up" => ("Open", 0),
        "close" | "down" => ("Close", 1),
        "stop" => ("Stop", 2),
        _ => resolve_function(family, name)?,
    };

    build(family, request, subtype, sequence, command, 0)
}

/// Somfy RFY shutters. Venetian tilt uses different command numbers in the
/// EU and US variants of the motor; the device configuration picks one.
fn prepare_shutter(
    family: &Family,
    request: &CommandRequest<'_>,
    payload: &CommandPayload,
    subtype: u8,
    sequence: u8,
) -> Result<PreparedCommand, CommandError> {
    let mode = request
        .device
        .and_then(|d| d.blinds_mode)
        .unwrap_or(BlindsMode::Eu);

    let name = function_name(payload);
    let command = match name.to_ascii_lowercase().as_str() {
        "stop" => ("Stop", 0),
        "up" | "open" => ("Up", 1),
        "down" | "close" => ("Down", 3),
        "venetian open" => match mode {
            BlindsMode::Eu => ("Venetian Open", 0x11),
            BlindsMode::Us => ("Venetian Open", 0x0F),
        },
        "venetian close" => match mode {
            BlindsMode::Eu => ("Venetian Close", 0x12),
            BlindsMode::Us => ("Venetian Close", 0x10),
        },
        _ => resolve_function(family, name)?,
    };

    build(family, request, subtype, sequence, command, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(
        device_type: &'a str,
        entity: &'a str,
        payload: &'a [u8],
        device: Option<&'a DeviceOverride>,
    ) -> CommandRequest<'a> {
        CommandRequest {
            device_type,
            entity,
            payload,
            device,
            default_repeat: 1,
        }
    }

    fn override_with_subtype(subtype: &str) -> DeviceOverride {
        DeviceOverride {
            id: "0x011B2F3A".to_string(),
            subtype: Some(subtype.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_lighting2_on_frame() {
        let payload = br#"{"command": "On", "subtype": "AC"}"#;
        let prepared = prepare(&request("lighting2", "0x011B2F3A/2", payload, None), 5).unwrap();

        assert_eq!(prepared.frame.packet_type, 0x11);
        assert_eq!(prepared.frame.subtype, 0);
        assert_eq!(prepared.frame.sequence, 5);
        assert_eq!(prepared.frame.data, vec![0x01, 0x1B, 0x2F, 0x3A, 2, 1, 0, 0]);
        assert_eq!(prepared.command, "On");
        assert_eq!(prepared.repeats, 1);
    }

    #[test]
    fn test_plain_text_payload_with_configured_subtype() {
        let device = override_with_subtype("AC");
        let prepared = prepare(
            &request("lighting2", "0x011B2F3A/1", b"Off", Some(&device)),
            0,
        )
        .unwrap();

        assert_eq!(prepared.frame.data[5], 0);
        assert_eq!(prepared.command, "Off");
    }

    #[test]
    fn test_numeric_subtype_in_payload() {
        let payload = br#"{"command": "On", "subtype": 1}"#;
        let prepared = prepare(&request("lighting2", "0x011B2F3A/1", payload, None), 0).unwrap();
        assert_eq!(prepared.frame.subtype, 1);
    }

    #[test]
    fn test_missing_subtype() {
        let err = prepare(&request("lighting2", "0x011B2F3A/1", b"On", None), 0).unwrap_err();
        assert!(matches!(err, CommandError::MissingSubtype(_)));
    }

    #[test]
    fn test_unknown_device_type() {
        let err = prepare(&request("lighting9", "0x01", b"On", None), 0).unwrap_err();
        assert!(matches!(err, CommandError::UnknownDeviceType(ref t) if t == "lighting9"));
    }

    #[test]
    fn test_invalid_function() {
        let device = override_with_subtype("AC");
        let err = prepare(
            &request("lighting2", "0x011B2F3A/1", b"Warp", Some(&device)),
            0,
        )
        .unwrap_err();
        assert!(
            matches!(err, CommandError::InvalidFunction { ref function, .. } if function == "Warp")
        );
    }

    #[test]
    fn test_malformed_json_payload() {
        let err = prepare(
            &request("lighting2", "0x011B2F3A/1", b"{\"command\": ", None),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::MalformedPayload(_)));
    }

    #[test]
    fn test_invalid_device_id() {
        let device = override_with_subtype("AC");
        let err = prepare(&request("lighting2", "0xZZZZ/1", b"On", Some(&device)), 0).unwrap_err();
        assert!(matches!(err, CommandError::MalformedPayload(_)));
    }

    #[test]
    fn test_device_id_too_wide() {
        let payload = br#"{"command": "On", "subtype": "ARC"}"#;
        let err = prepare(&request("lighting1", "0x4142/5", payload, None), 0).unwrap_err();
        assert!(matches!(err, CommandError::MalformedPayload(_)));
    }

    #[test]
    fn test_lighting1_house_code() {
        let payload = br#"{"command": "Chime", "subtype": "ARC"}"#;
        let prepared = prepare(&request("lighting1", "0x41/5", payload, None), 0).unwrap();

        assert_eq!(prepared.frame.packet_type, 0x10);
        assert_eq!(prepared.frame.subtype, 1);
        assert_eq!(prepared.frame.data, vec![0x41, 5, 7, 0]);
    }

    #[test]
    fn test_set_level_requires_level() {
        let payload = br#"{"command": "Set Level", "subtype": "AC"}"#;
        let err = prepare(&request("lighting2", "0x011B2F3A/1", payload, None), 0).unwrap_err();
        assert!(matches!(err, CommandError::MalformedPayload(_)));
    }

    #[test]
    fn test_lighting5_level_clamped() {
        let payload = br#"{"command": "Set Level", "subtype": "LIGHTWAVERF", "level": 40}"#;
        let prepared = prepare(&request("lighting5", "0xF09AC8/1", payload, None), 0).unwrap();

        assert_eq!(prepared.frame.data[4], 0x10);
        assert_eq!(prepared.frame.data[5], 31);
    }

    #[test]
    fn test_group_command_without_unit() {
        let payload = br#"{"command": "Group On", "subtype": "AC"}"#;
        let prepared = prepare(&request("lighting2", "0x011B2F3A", payload, None), 0).unwrap();
        assert_eq!(prepared.frame.data[4], 0);
        assert_eq!(prepared.frame.data[5], 4);
    }

    #[test]
    fn test_repetitions_from_device_config() {
        let mut device = override_with_subtype("AC");
        device.repetitions = Some(3);

        let prepared = prepare(
            &request("lighting2", "0x011B2F3A/1", b"On", Some(&device)),
            0,
        )
        .unwrap();
        assert_eq!(prepared.repeats, 3);
    }

    #[test]
    fn test_blinds_aliases() {
        let payload = br#"{"command": "Up", "subtype": "BLINDS_T0"}"#;
        let prepared = prepare(&request("blinds1", "0x1234AB/1", payload, None), 0).unwrap();
        assert_eq!(prepared.frame.data[4], 0);
        assert_eq!(prepared.command, "Open");

        let payload = br#"{"command": "Down", "subtype": "BLINDS_T0"}"#;
        let prepared = prepare(&request("blinds1", "0x1234AB/1", payload, None), 0).unwrap();
        assert_eq!(prepared.frame.data[4], 1);
    }

    #[test]
    fn test_rfy_venetian_mode() {
        let payload = br#"{"command": "Venetian Open", "subtype": "RFY"}"#;

        let eu = override_with_subtype("RFY");
        let prepared = prepare(&request("rfy", "0x01AB02/1", payload, Some(&eu)), 0).unwrap();
        assert_eq!(prepared.frame.data[4], 0x11);

        let mut us = override_with_subtype("RFY");
        us.blinds_mode = Some(BlindsMode::Us);
        let prepared = prepare(&request("rfy", "0x01AB02/1", payload, Some(&us)), 0).unwrap();
        assert_eq!(prepared.frame.data[4], 0x0F);
    }

    #[test]
    fn test_lighting4_raw_data() {
        let payload = br#"{"subtype": "PT2262"}"#;
        let prepared = prepare(&request("lighting4", "0x25D3A2", payload, None), 0).unwrap();

        assert_eq!(prepared.frame.packet_type, 0x13);
        assert_eq!(prepared.frame.data, vec![0x25, 0xD3, 0xA2, 0x01, 0x5E, 0]);

        let payload = br#"{"subtype": "PT2262", "pulse": 500}"#;
        let prepared = prepare(&request("lighting4", "0x25D3A2", payload, None), 0).unwrap();
        assert_eq!(prepared.frame.data[3], 0x01);
        assert_eq!(prepared.frame.data[4], 0xF4);
    }

    #[test]
    fn test_command_name_lookup() {
        assert_eq!(command_name("lighting2", 4), Some("Group On"));
        assert_eq!(command_name("lighting6", 0), Some("On"));
        assert_eq!(command_name("lighting2", 99), None);
        assert_eq!(subtype_name("lighting2", 0), Some("AC"));
        assert_eq!(subtype_name("rfy", 2), Some("ASA"));
        assert!(is_known_type("blinds1"));
        assert!(!is_known_type("weather7"));
    }
}
