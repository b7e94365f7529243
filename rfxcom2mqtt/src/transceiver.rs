//! RFXCOM transceiver adapter.
//!
//! Wraps the serial link to the radio hardware behind connect/handshake,
//! command transmission and per-kind subscriber fan-out. The sentinel port
//! "mock" swaps the serial stream for a scripted in-memory transport that
//! answers the same handshake and records transmitted frames.

use crate::command::{self, CommandRequest};
use crate::event::{CoordinatorInfo, RadioEvent, TransceiverStatus};
use crate::frame::{self, Frame};
use rfxcom2mqtt_common::config::{DeviceOverride, RadioConfig};
use rfxcom2mqtt_common::error::{CommandError, ConnectError};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, error, info, warn};

/// Serial port value selecting the scripted in-memory transceiver.
pub const MOCK_PORT: &str = "mock";

const BAUD_RATE: u32 = 38400;
const RESET_SETTLE: Duration = Duration::from_millis(500);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(60);

enum TransportReader {
    Serial(ReadHalf<SerialStream>),
    Mock(mpsc::UnboundedReceiver<Frame>),
}

impl TransportReader {
    async fn next_frame(&mut self) -> std::io::Result<Frame> {
        match self {
            Self::Serial(reader) => frame::read_frame(reader).await,
            Self::Mock(receiver) => receiver.recv().await.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock link closed")
            }),
        }
    }
}

enum TransportWriter {
    Serial(WriteHalf<SerialStream>),
    Mock(MockLink),
}

impl TransportWriter {
    async fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        match self {
            Self::Serial(writer) => {
                writer.write_all(&frame.encode()).await?;
                writer.flush().await
            }
            Self::Mock(link) => {
                link.write(frame);
                Ok(())
            }
        }
    }
}

/// Scripted transport used for the sentinel port and in tests.
///
/// Interface control frames get the responses real hardware would send;
/// after the receiver is started a couple of device events are played so a
/// bridge on the mock port has something to publish.
struct MockLink {
    feed: mpsc::UnboundedSender<Frame>,
    sent: Arc<StdMutex<Vec<Frame>>>,
    mask: StdMutex<[u8; 3]>,
}

impl MockLink {
    fn new(feed: mpsc::UnboundedSender<Frame>, sent: Arc<StdMutex<Vec<Frame>>>) -> Self {
        Self {
            feed,
            sent,
            mask: StdMutex::new(frame::protocol_mask(frame::DEFAULT_PROTOCOLS)),
        }
    }

    fn write(&self, frame: &Frame) {
        self.sent.lock().unwrap().push(frame.clone());

        if frame.packet_type != frame::PACKET_INTERFACE_CONTROL {
            return;
        }

        match frame.data.first() {
            Some(&frame::CMD_GET_STATUS) => self.feed_status(),
            Some(&frame::CMD_SET_MODE) => {
                if frame.data.len() >= 7 {
                    *self.mask.lock().unwrap() = [frame.data[3], frame.data[4], frame.data[5]];
                }
                self.feed_status();
            }
            Some(&frame::CMD_START_RECEIVER) => self.feed_scripted_events(),
            _ => {}
        }
    }

    fn feed_status(&self) {
        let mask = *self.mask.lock().unwrap();
        let data = vec![
            frame::CMD_GET_STATUS,
            0x53,
            0xF2,
            mask[0],
            mask[1],
            mask[2],
            1,
            0,
            0,
            1,
        ];
        let _ = self
            .feed
            .send(Frame::new(frame::PACKET_INTERFACE_MESSAGE, 0x00, 1, data));
    }

    fn feed_scripted_events(&self) {
        // One sensor reading and one switch event.
        let _ = self.feed.send(Frame::new(
            frame::PACKET_TEMPERATURE_HUMIDITY1,
            1,
            2,
            vec![0x6F, 0x01, 0x00, 0xD9, 58, 1, 0x89],
        ));
        let _ = self.feed.send(Frame::new(
            frame::PACKET_LIGHTING2,
            0,
            3,
            vec![0x01, 0x1B, 0x2F, 0x3A, 1, 1, 0, 0x70],
        ));
    }
}

struct Shared {
    connected: AtomicBool,
    sequence: AtomicU8,
    receiver_type_code: AtomicU8,
    debug: bool,
    coordinator: StdRwLock<Option<CoordinatorInfo>>,
    writer: Mutex<Option<TransportWriter>>,
    event_subscribers: StdMutex<Vec<UnboundedSender<RadioEvent>>>,
    status_subscribers: StdMutex<Vec<UnboundedSender<CoordinatorInfo>>>,
    disconnect_subscribers: StdMutex<Vec<UnboundedSender<()>>>,
    status_seen: Notify,
    mock_sent: Arc<StdMutex<Vec<Frame>>>,
    read_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Handle to the radio hardware, cheap to clone.
#[derive(Clone)]
pub struct RfxTransceiver {
    config: RadioConfig,
    shared: Arc<Shared>,
}

impl RfxTransceiver {
    pub fn new(config: RadioConfig) -> Self {
        let debug = config.debug;
        Self {
            config,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                sequence: AtomicU8::new(0),
                receiver_type_code: AtomicU8::new(0x53),
                debug,
                coordinator: StdRwLock::new(None),
                writer: Mutex::new(None),
                event_subscribers: StdMutex::new(Vec::new()),
                status_subscribers: StdMutex::new(Vec::new()),
                disconnect_subscribers: StdMutex::new(Vec::new()),
                status_seen: Notify::new(),
                mock_sent: Arc::new(StdMutex::new(Vec::new())),
                read_task: StdMutex::new(None),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// The coordinator info from the last status response.
    pub fn coordinator(&self) -> Option<CoordinatorInfo> {
        self.shared.coordinator.read().unwrap().clone()
    }

    /// Frames written to the mock transport, in transmission order.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.shared.mock_sent.lock().unwrap().clone()
    }

    pub fn subscribe_events(&self, sender: UnboundedSender<RadioEvent>) {
        self.shared.event_subscribers.lock().unwrap().push(sender);
    }

    pub fn subscribe_status(&self, sender: UnboundedSender<CoordinatorInfo>) {
        self.shared.status_subscribers.lock().unwrap().push(sender);
    }

    pub fn subscribe_disconnects(&self, sender: UnboundedSender<()>) {
        self.shared
            .disconnect_subscribers
            .lock()
            .unwrap()
            .push(sender);
    }

    /// Open the transport and run the handshake.
    ///
    /// Reset, wait for the hardware to settle, request status, start the
    /// receiver, then enable the configured protocol filters.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if self.is_connected() {
            return Ok(());
        }

        let (reader, writer) = self.open_transport()?;
        *self.shared.writer.lock().await = Some(writer);

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(read_loop(shared, reader));
        if let Some(previous) = self.shared.read_task.lock().unwrap().replace(task) {
            previous.abort();
        }

        if let Err(err) = self.handshake().await {
            self.teardown().await;
            return Err(err);
        }

        self.enable_protocols().await?;
        self.shared.connected.store(true, Ordering::Release);

        if let Some(info) = self.coordinator() {
            info!(
                "Transceiver ready: {} firmware {} ({})",
                info.receiver_type, info.firmware_version, info.firmware_type
            );
        }
        Ok(())
    }

    /// Keep trying to connect until it works.
    pub async fn connect_with_retry(&self) {
        loop {
            match self.connect().await {
                Ok(()) => return,
                Err(err) => {
                    error!(
                        "Transceiver connect failed: {}; retrying in {}s",
                        err,
                        RETRY_DELAY.as_secs()
                    );
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    fn open_transport(&self) -> Result<(TransportReader, TransportWriter), ConnectError> {
        if self.config.port == MOCK_PORT {
            info!("Using mock transceiver");
            let (feed, receiver) = mpsc::unbounded_channel();
            let link = MockLink::new(feed, Arc::clone(&self.shared.mock_sent));
            return Ok((TransportReader::Mock(receiver), TransportWriter::Mock(link)));
        }

        info!("Opening serial port {} at {} baud", self.config.port, BAUD_RATE);
        let stream = tokio_serial::new(&self.config.port, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|err| {
                ConnectError::Transport(format!("cannot open {}: {}", self.config.port, err))
            })?;

        let (reader, writer) = tokio::io::split(stream);
        Ok((
            TransportReader::Serial(reader),
            TransportWriter::Serial(writer),
        ))
    }

    async fn handshake(&self) -> Result<(), ConnectError> {
        let transport_err =
            |err: std::io::Error| ConnectError::Transport(format!("handshake write: {}", err));

        self.write_frame(&frame::reset_frame(self.next_sequence()))
            .await
            .map_err(transport_err)?;
        sleep(RESET_SETTLE).await;

        let mut status_seen = std::pin::pin!(self.shared.status_seen.notified());
        status_seen.as_mut().enable();

        self.write_frame(&frame::status_request_frame(self.next_sequence()))
            .await
            .map_err(transport_err)?;

        timeout(HANDSHAKE_TIMEOUT, status_seen).await.map_err(|_| {
            ConnectError::Handshake(format!(
                "no status response within {}s",
                HANDSHAKE_TIMEOUT.as_secs()
            ))
        })?;

        self.write_frame(&frame::start_receiver_frame(self.next_sequence()))
            .await
            .map_err(transport_err)?;

        Ok(())
    }

    async fn enable_protocols(&self) -> Result<(), ConnectError> {
        let mut names: Vec<String> = Vec::new();
        for name in &self.config.receive {
            if frame::is_supported_protocol(name) {
                names.push(name.clone());
            } else {
                warn!("Ignoring unsupported protocol '{}'", name);
            }
        }

        if names.is_empty() {
            names = frame::DEFAULT_PROTOCOLS
                .iter()
                .map(|s| s.to_string())
                .collect();
        }

        info!("Enabling protocols: {}", names.join(", "));
        let mask = frame::protocol_mask(&names);
        let type_code = self.shared.receiver_type_code.load(Ordering::Acquire);

        let mut status_seen = std::pin::pin!(self.shared.status_seen.notified());
        status_seen.as_mut().enable();

        self.write_frame(&frame::set_mode_frame(self.next_sequence(), type_code, mask))
            .await
            .map_err(|err| ConnectError::Transport(format!("set mode write: {}", err)))?;

        // The firmware confirms the new mask with a status message.
        if timeout(HANDSHAKE_TIMEOUT, status_seen).await.is_err() {
            warn!("No confirmation for protocol selection");
        }
        Ok(())
    }

    /// Translate and transmit a command.
    ///
    /// The frame is written `repetitions` times (device override, else the
    /// configured transmit repeat). Any translation error leaves the radio
    /// untouched.
    pub async fn send_command(
        &self,
        device_type: &str,
        entity: &str,
        payload: &[u8],
        device: Option<&DeviceOverride>,
    ) -> Result<(), CommandError> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }

        let request = CommandRequest {
            device_type,
            entity,
            payload,
            device,
            default_repeat: self.config.transmit.repeat,
        };
        let prepared = command::prepare(&request, self.next_sequence())?;

        info!(
            "Transmitting '{}' to {} {} ({}x)",
            prepared.command, device_type, entity, prepared.repeats
        );

        for _ in 0..prepared.repeats {
            if let Err(err) = self.write_frame(&prepared.frame).await {
                warn!("Transmit failed: {}", err);
                return Err(CommandError::NotConnected);
            }
        }
        Ok(())
    }

    /// Live status query.
    pub async fn status(&self) -> TransceiverStatus {
        if !self.is_connected() {
            return TransceiverStatus::Offline;
        }

        let mut status_seen = std::pin::pin!(self.shared.status_seen.notified());
        status_seen.as_mut().enable();

        if self
            .write_frame(&frame::status_request_frame(self.next_sequence()))
            .await
            .is_err()
        {
            return TransceiverStatus::Offline;
        }

        match timeout(STATUS_TIMEOUT, status_seen).await {
            Ok(()) => TransceiverStatus::Online,
            Err(_) => TransceiverStatus::Offline,
        }
    }

    /// Close the transport and stop the read loop.
    pub async fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.teardown().await;
        info!("Transceiver disconnected");
    }

    async fn teardown(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.shared.writer.lock().await.take();
        if let Some(task) = self.shared.read_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn next_sequence(&self) -> u8 {
        self.shared.sequence.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_frame(&self, frame: &Frame) -> std::io::Result<()> {
        let mut writer = self.shared.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => {
                if self.shared.debug {
                    debug!("Sending frame {:02X?}", frame.encode());
                }
                writer.write_frame(frame).await
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transceiver not connected",
            )),
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: TransportReader) {
    loop {
        match reader.next_frame().await {
            Ok(frame) => handle_frame(&shared, frame),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Skipping malformed frame: {}", err);
            }
            Err(err) => {
                // A deliberate disconnect flips the flag first and stays quiet.
                if shared.connected.swap(false, Ordering::AcqRel) {
                    warn!("Transceiver link lost: {}", err);
                    fan_out(&shared.disconnect_subscribers, ());
                }
                break;
            }
        }
    }
}

fn handle_frame(shared: &Arc<Shared>, frame: Frame) {
    if shared.debug {
        debug!("Received frame {:02X?}", frame.encode());
    }

    if frame.packet_type == frame::PACKET_INTERFACE_MESSAGE {
        if let Some(code) = frame.data.get(1) {
            shared.receiver_type_code.store(*code, Ordering::Release);
        }
        if let Some(info) = frame::decode_interface_message(&frame) {
            *shared.coordinator.write().unwrap() = Some(info.clone());
            fan_out(&shared.status_subscribers, info);
        }
        shared.status_seen.notify_waiters();
        return;
    }

    match frame::decode_event(&frame) {
        Some(event) => fan_out(&shared.event_subscribers, event),
        None => debug!("Ignoring packet type 0x{:02X}", frame.packet_type),
    }
}

fn fan_out<T: Clone>(senders: &StdMutex<Vec<UnboundedSender<T>>>, value: T) {
    let mut senders = senders.lock().unwrap();
    senders.retain(|sender| sender.send(value.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config() -> RadioConfig {
        RadioConfig {
            port: MOCK_PORT.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_handshake() {
        let transceiver = RfxTransceiver::new(mock_config());
        transceiver.connect().await.unwrap();

        assert!(transceiver.is_connected());
        let info = transceiver.coordinator().unwrap();
        assert_eq!(info.receiver_type, "433.92MHz transceiver");
        assert_eq!(info.firmware_version, 0xF2);

        // Reset, status request, start receiver, set mode.
        let sent = transceiver.sent_frames();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].data[0], frame::CMD_RESET);
        assert_eq!(sent[1].data[0], frame::CMD_GET_STATUS);
        assert_eq!(sent[2].data[0], frame::CMD_START_RECEIVER);
        assert_eq!(sent[3].data[0], frame::CMD_SET_MODE);
    }

    #[tokio::test]
    async fn test_mock_scripted_events() {
        let transceiver = RfxTransceiver::new(mock_config());
        let (sender, mut events) = mpsc::unbounded_channel();
        transceiver.subscribe_events(sender);
        transceiver.connect().await.unwrap();

        let first = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.device_type, "temperaturehumidity1");
        assert_eq!(first.temperature, Some(21.7));

        let second = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.device_type, "lighting2");
        assert_eq!(second.command.as_deref(), Some("On"));
    }

    #[tokio::test]
    async fn test_protocol_filter_validation() {
        let mut config = mock_config();
        config.receive = vec!["AC".to_string(), "NOTAPROTOCOL".to_string()];

        let transceiver = RfxTransceiver::new(config);
        transceiver.connect().await.unwrap();

        // The mock echoes the requested mask back in its status response.
        let info = transceiver.coordinator().unwrap();
        assert_eq!(info.enabled_protocols, vec!["AC".to_string()]);
    }

    #[tokio::test]
    async fn test_send_command_repeats() {
        let mut config = mock_config();
        config.transmit.repeat = 2;
        let transceiver = RfxTransceiver::new(config);
        transceiver.connect().await.unwrap();

        let payload = br#"{"command": "On", "subtype": "AC"}"#;
        transceiver
            .send_command("lighting2", "0x011B2F3A/1", payload, None)
            .await
            .unwrap();

        let transmitted: Vec<Frame> = transceiver
            .sent_frames()
            .into_iter()
            .filter(|f| f.packet_type == frame::PACKET_LIGHTING2)
            .collect();
        assert_eq!(transmitted.len(), 2);
        assert_eq!(transmitted[0].data, transmitted[1].data);
    }

    #[tokio::test]
    async fn test_send_command_requires_connection() {
        let transceiver = RfxTransceiver::new(mock_config());
        let err = transceiver
            .send_command("lighting2", "0x011B2F3A/1", b"On", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotConnected));
    }

    #[tokio::test]
    async fn test_command_error_transmits_nothing() {
        let transceiver = RfxTransceiver::new(mock_config());
        transceiver.connect().await.unwrap();
        let before = transceiver.sent_frames().len();

        let err = transceiver
            .send_command("lighting2", "0x011B2F3A/1", b"On", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::MissingSubtype(_)));
        assert_eq!(transceiver.sent_frames().len(), before);
    }

    #[tokio::test]
    async fn test_status_query() {
        let transceiver = RfxTransceiver::new(mock_config());
        assert_eq!(transceiver.status().await, TransceiverStatus::Offline);

        transceiver.connect().await.unwrap();
        assert_eq!(transceiver.status().await, TransceiverStatus::Online);

        transceiver.disconnect().await;
        assert_eq!(transceiver.status().await, TransceiverStatus::Offline);
    }

    #[tokio::test]
    async fn test_deliberate_disconnect_is_quiet() {
        let transceiver = RfxTransceiver::new(mock_config());
        let (sender, mut disconnects) = mpsc::unbounded_channel();
        transceiver.subscribe_disconnects(sender);

        transceiver.connect().await.unwrap();
        transceiver.disconnect().await;

        tokio::task::yield_now().await;
        assert!(disconnects.try_recv().is_err());
    }
}
