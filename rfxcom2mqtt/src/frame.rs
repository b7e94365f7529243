//! RFXCOM frame codec.
//!
//! Frames are length-prefixed: one length byte counting the rest, then
//! packet type, subtype, sequence number, and the packet data. This module
//! owns the byte layout; [`crate::command`] and [`crate::event`] own the
//! semantics built on top of it.

use crate::command;
use crate::event::{
    CoordinatorInfo, RadioEvent, humidity_status_label, is_group_command, security_status_label,
};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Interface control (host to transceiver).
pub const PACKET_INTERFACE_CONTROL: u8 = 0x00;
/// Interface message (transceiver to host).
pub const PACKET_INTERFACE_MESSAGE: u8 = 0x01;
pub const PACKET_LIGHTING1: u8 = 0x10;
pub const PACKET_LIGHTING2: u8 = 0x11;
pub const PACKET_LIGHTING4: u8 = 0x13;
pub const PACKET_LIGHTING5: u8 = 0x14;
pub const PACKET_LIGHTING6: u8 = 0x15;
pub const PACKET_BLINDS1: u8 = 0x19;
pub const PACKET_RFY: u8 = 0x1A;
pub const PACKET_SECURITY1: u8 = 0x20;
pub const PACKET_TEMPERATURE_HUMIDITY1: u8 = 0x52;

pub const CMD_RESET: u8 = 0x00;
pub const CMD_GET_STATUS: u8 = 0x02;
pub const CMD_SET_MODE: u8 = 0x03;
pub const CMD_START_RECEIVER: u8 = 0x07;

/// A decoded transceiver frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet_type: u8,
    pub subtype: u8,
    pub sequence: u8,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(packet_type: u8, subtype: u8, sequence: u8, data: Vec<u8>) -> Self {
        Self {
            packet_type,
            subtype,
            sequence,
            data,
        }
    }

    /// Serialize with the leading length byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.push((3 + self.data.len()) as u8);
        bytes.push(self.packet_type);
        bytes.push(self.subtype);
        bytes.push(self.sequence);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// Read one frame from the byte stream.
///
/// A length byte below the three-byte header is reported as
/// `InvalidData`; callers skip those and keep reading.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Frame> {
    let len = reader.read_u8().await? as usize;
    if len < 3 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {} below header size", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    Ok(Frame {
        packet_type: body[0],
        subtype: body[1],
        sequence: body[2],
        data: body[3..].to_vec(),
    })
}

fn interface_control(sequence: u8, cmnd: u8, msg: [u8; 9]) -> Frame {
    let mut data = vec![cmnd];
    data.extend_from_slice(&msg);
    Frame::new(PACKET_INTERFACE_CONTROL, 0x00, sequence, data)
}

/// Reset command; the transceiver answers nothing and needs a settle delay.
pub fn reset_frame(sequence: u8) -> Frame {
    interface_control(sequence, CMD_RESET, [0; 9])
}

/// Status request; answered with an interface message.
pub fn status_request_frame(sequence: u8) -> Frame {
    interface_control(sequence, CMD_GET_STATUS, [0; 9])
}

/// Start the receiver after the handshake.
pub fn start_receiver_frame(sequence: u8) -> Frame {
    interface_control(sequence, CMD_START_RECEIVER, [0; 9])
}

/// Set the receiver type and enabled protocol mask.
pub fn set_mode_frame(sequence: u8, type_code: u8, mask: [u8; 3]) -> Frame {
    interface_control(
        sequence,
        CMD_SET_MODE,
        [type_code, 0x00, mask[0], mask[1], mask[2], 0, 0, 0, 0],
    )
}

/// Receive protocols and their position in the mode-command mask.
///
/// The byte index is relative to msg3; the mappings are fixed by the
/// transceiver firmware.
const PROTOCOLS: &[(&str, usize, u8)] = &[
    ("UNDECODED", 0, 0x80),
    ("IMAGINTRONIX", 0, 0x40),
    ("BYRONSX", 0, 0x20),
    ("RSL", 0, 0x10),
    ("LIGHTING4", 0, 0x08),
    ("FINEOFFSET", 0, 0x04),
    ("RUBICSON", 0, 0x02),
    ("BLYSS", 0, 0x01),
    ("BLINDST1234", 1, 0x80),
    ("BLINDST0", 1, 0x40),
    ("PROGUARD", 1, 0x20),
    ("FS20", 1, 0x10),
    ("LACROSSE", 1, 0x08),
    ("HIDEKI", 1, 0x04),
    ("LIGHTWAVERF", 1, 0x02),
    ("MERTIK", 1, 0x01),
    ("VISONIC", 2, 0x80),
    ("ATI", 2, 0x40),
    ("OREGON", 2, 0x20),
    ("MEIANTECH", 2, 0x10),
    ("HOMEEASY", 2, 0x08),
    ("AC", 2, 0x04),
    ("ARC", 2, 0x02),
    ("X10", 2, 0x01),
];

/// Protocol names accepted in the receive filter configuration.
pub fn supported_protocols() -> Vec<&'static str> {
    PROTOCOLS.iter().map(|(name, _, _)| *name).collect()
}

/// Whether a protocol name is in the supported set.
pub fn is_supported_protocol(name: &str) -> bool {
    PROTOCOLS.iter().any(|(n, _, _)| n.eq_ignore_ascii_case(name))
}

/// Receive filters enabled when the configuration lists none.
pub const DEFAULT_PROTOCOLS: &[&str] = &[
    "AC",
    "ARC",
    "X10",
    "OREGON",
    "HOMEEASY",
    "LIGHTING4",
    "LACROSSE",
];

/// Build the mode-command mask for a set of protocol names.
///
/// Unknown names are ignored; the caller validates and logs them.
pub fn protocol_mask<S: AsRef<str>>(names: &[S]) -> [u8; 3] {
    let mut mask = [0u8; 3];
    for name in names {
        if let Some((_, byte, bit)) = PROTOCOLS
            .iter()
            .find(|(n, _, _)| n.eq_ignore_ascii_case(name.as_ref()))
        {
            mask[*byte] |= bit;
        }
    }
    mask
}

fn enabled_protocols(mask: [u8; 3]) -> Vec<String> {
    PROTOCOLS
        .iter()
        .filter(|(_, byte, bit)| mask[*byte] & bit != 0)
        .map(|(name, _, _)| name.to_string())
        .collect()
}

fn receiver_type_label(code: u8) -> String {
    match code {
        0x50 => "310MHz".to_string(),
        0x51 => "315MHz".to_string(),
        0x52 => "433.92MHz receiver only".to_string(),
        0x53 => "433.92MHz transceiver".to_string(),
        0x54 => "433.42MHz".to_string(),
        0x55 => "868MHz".to_string(),
        0x56 => "868MHz FSK".to_string(),
        other => format!("Unknown 0x{:02X}", other),
    }
}

fn firmware_type_label(code: u8) -> String {
    match code {
        0 => "Type1 RX".to_string(),
        1 => "Type1".to_string(),
        2 => "Type2".to_string(),
        3 => "Ext".to_string(),
        4 => "Ext2".to_string(),
        5 => "Pro1".to_string(),
        6 => "Pro2".to_string(),
        other => format!("Unknown {}", other),
    }
}

/// Decode a status interface message into coordinator info.
///
/// Layout after the header: command echo, receiver type, firmware version,
/// three protocol mask bytes, hardware major/minor, output power, firmware
/// type. Short (older firmware) responses decode with defaults.
pub fn decode_interface_message(frame: &Frame) -> Option<CoordinatorInfo> {
    if frame.packet_type != PACKET_INTERFACE_MESSAGE || frame.data.len() < 6 {
        return None;
    }

    let data = &frame.data;
    let mask = [data[3], data[4], data[5]];

    Some(CoordinatorInfo {
        receiver_type: receiver_type_label(data[1]),
        hardware_version: format!(
            "{}.{}",
            data.get(6).copied().unwrap_or(0),
            data.get(7).copied().unwrap_or(0)
        ),
        firmware_version: data[2] as u32,
        firmware_type: firmware_type_label(data.get(9).copied().unwrap_or(0)),
        enabled_protocols: enabled_protocols(mask),
    })
}

fn format_id(bytes: &[u8]) -> String {
    let mut id = String::with_capacity(2 + bytes.len() * 2);
    id.push_str("0x");
    for b in bytes {
        id.push_str(&format!("{:02X}", b));
    }
    id
}

fn base_event(family: &'static str, frame: &Frame, id: String) -> RadioEvent {
    let mut event = RadioEvent::new(family, frame.subtype, id);
    event.subtype_label = command::subtype_name(family, frame.subtype).map(str::to_string);
    event
}

fn with_command(mut event: RadioEvent, number: u8) -> RadioEvent {
    event.command = command::command_name(&event.device_type, number).map(str::to_string);
    event.command_number = Some(number);
    event.is_group = is_group_command(&event.device_type, number);
    event
}

/// Decode a received frame into a normalized radio event.
///
/// Interface messages and unrecognized packet types yield `None`.
pub fn decode_event(frame: &Frame) -> Option<RadioEvent> {
    let data = &frame.data;

    match frame.packet_type {
        PACKET_LIGHTING1 if data.len() >= 4 => {
            let mut event = base_event("lighting1", frame, format_id(&data[..1]));
            event.unit_code = Some(data[1].to_string());
            event = with_command(event, data[2]);
            event.rssi = Some(data[3] >> 4);
            Some(event)
        }
        PACKET_LIGHTING2 if data.len() >= 8 => {
            let mut event = base_event("lighting2", frame, format_id(&data[..4]));
            event.unit_code = Some(data[4].to_string());
            event = with_command(event, data[5]);
            event.level = Some(data[6]);
            event.rssi = Some(data[7] >> 4);
            Some(event)
        }
        PACKET_LIGHTING4 if data.len() >= 6 => {
            let mut event = base_event("lighting4", frame, String::new());
            event.data = Some(format_id(&data[..3]));
            event.rssi = Some(data[5] >> 4);
            Some(event)
        }
        PACKET_LIGHTING5 if data.len() >= 7 => {
            let mut event = base_event("lighting5", frame, format_id(&data[..3]));
            event.unit_code = Some(data[3].to_string());
            event = with_command(event, data[4]);
            event.level = Some(data[5]);
            event.rssi = Some(data[6] >> 4);
            Some(event)
        }
        PACKET_LIGHTING6 if data.len() >= 8 => {
            let mut event = base_event("lighting6", frame, format_id(&data[..2]));
            event.unit_code = Some(data[3].to_string());
            event = with_command(event, data[4]);
            event.rssi = Some(data[7] >> 4);
            Some(event)
        }
        PACKET_BLINDS1 if data.len() >= 6 => {
            let mut event = base_event("blinds1", frame, format_id(&data[..3]));
            event.unit_code = Some(data[3].to_string());
            event = with_command(event, data[4]);
            event.rssi = Some(data[5] >> 4);
            Some(event)
        }
        PACKET_RFY if data.len() >= 5 => {
            let mut event = base_event("rfy", frame, format_id(&data[..3]));
            event.unit_code = Some(data[3].to_string());
            event = with_command(event, data[4]);
            Some(event)
        }
        PACKET_SECURITY1 if data.len() >= 5 => {
            let mut event = base_event("security1", frame, format_id(&data[..3]));
            event.subtype_label = security1_subtype_name(frame.subtype).map(str::to_string);
            event.status = Some(security_status_label(data[3]));
            event.rssi = Some(data[4] >> 4);
            event.battery_level = Some(data[4] & 0x0F);
            Some(event)
        }
        PACKET_TEMPERATURE_HUMIDITY1 if data.len() >= 7 => {
            let mut event = base_event("temperaturehumidity1", frame, format_id(&data[..2]));
            event.subtype_label = Some(format!("TH{}", frame.subtype));

            let raw = ((data[2] & 0x7F) as i32) << 8 | data[3] as i32;
            let temperature = if data[2] & 0x80 != 0 { -raw } else { raw };
            event.temperature = Some(temperature as f64 / 10.0);
            event.humidity = Some(data[4]);
            event.humidity_status = Some(humidity_status_label(data[5]).to_string());
            event.rssi = Some(data[6] >> 4);
            event.battery_level = Some(data[6] & 0x0F);
            Some(event)
        }
        _ => None,
    }
}

fn security1_subtype_name(subtype: u8) -> Option<&'static str> {
    const NAMES: &[&str] = &[
        "X10_DOOR_WINDOW",
        "X10_MOTION",
        "X10_REMOTE",
        "KD101",
        "POWERCODE_DOOR_WINDOW",
        "POWERCODE_MOTION",
        "CODESECURE",
        "POWERCODE_AUX",
        "MEIANTECH",
        "SA30",
        "RM174RF",
    ];
    NAMES.get(subtype as usize).copied()
}
