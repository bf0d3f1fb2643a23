//! Holder-role transport engine.
//!
//! The holder presents the credential and acts as the BLE central: it scans
//! for the service UUID shared through engagement, connects to the reader's
//! peripheral, and picks one of the two wire flows from the characteristics
//! the reader exposes. Requests come in either as continuation-prefixed
//! chunks on Server2Client or as one whole message over an L2CAP stream;
//! the signed response goes back out the same way.

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::transport::ble::characteristics::{
    characteristic_name, ReaderCharacteristic, STATE_END, STATE_START,
};
use crate::transport::ble::chunk::{
    self, ChunkError, ChunkProgress, Reassembler, WritingQueue, CHUNK_FINAL,
};
use crate::transport::ble::config::BleTransportConfig;
use crate::transport::ble::hardware::{CentralEvent, CentralHardware, DeviceId, RadioState};
use crate::transport::ble::l2cap::{decode_psm, L2capStream, StreamState, PSM_LENGTH};
use crate::transport::ble::TransferFlow;
use crate::transport::TransportError;

/// States of the holder machine. The three final states are terminal; a
/// new engagement requires a new engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HolderMachineState {
    /// Scanning for and connecting to the engaged service.
    Engaging,
    /// Link up, discovering characteristics.
    Connected,
    /// Start signal sent (or stream open), waiting for the request.
    AwaitingRequest,
    /// Request surfaced, waiting for the user's namespace selection.
    SelectingNamespaces,
    /// Response transmission in progress.
    SendingResponse,
    Success,
    Error,
    Canceled,
}

/// Events the engine surfaces to the session layer.
#[derive(Debug, Clone, PartialEq)]
pub enum HolderTransportEvent {
    /// The link to the reader is up.
    Connected,
    /// A complete request message was received.
    Message(Vec<u8>),
    /// Response chunks sent so far and the total to send.
    UploadProgress { sent: usize, total: usize },
    /// The full response is on the wire.
    Done,
    /// The exchange failed; the engine is terminal after this.
    Error(TransportError),
}

/// Holder transport engine over an injected platform central.
pub struct HolderBleCentral<H: CentralHardware> {
    hardware: H,
    service_uuid: Uuid,
    config: BleTransportConfig,
    state: HolderMachineState,
    flow: Option<TransferFlow>,
    target: Option<DeviceId>,
    max_chunk_size: Option<usize>,
    reassembler: Reassembler,
    writing_queue: Option<WritingQueue>,
    stream: L2capStream,
    psm: Option<u16>,
    ident: Option<Vec<u8>>,
    events: Vec<HolderTransportEvent>,
}

impl<H: CentralHardware> HolderBleCentral<H> {
    pub fn new(hardware: H, service_uuid: Uuid, config: BleTransportConfig) -> Self {
        let reassembler = Reassembler::new(config.max_message_size);
        Self {
            hardware,
            service_uuid,
            config,
            state: HolderMachineState::Engaging,
            flow: None,
            target: None,
            max_chunk_size: None,
            reassembler,
            writing_queue: None,
            stream: L2capStream::new(),
            psm: None,
            ident: None,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> HolderMachineState {
        self.state
    }

    pub fn flow(&self) -> Option<TransferFlow> {
        self.flow
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            HolderMachineState::Success | HolderMachineState::Error | HolderMachineState::Canceled
        )
    }

    /// Events accumulated since the last drain, in emission order.
    pub fn drain_events(&mut self) -> Vec<HolderTransportEvent> {
        std::mem::take(&mut self.events)
    }

    /// Feed one hardware event. Events after a terminal state are ignored.
    pub fn handle_event(&mut self, event: CentralEvent) {
        if self.is_terminal() {
            trace!(?event, "event after terminal state ignored");
            return;
        }
        match event {
            CentralEvent::Radio(state) => self.on_radio(state),
            CentralEvent::DeviceDiscovered { device } => self.on_discovered(device),
            CentralEvent::Connected { device } => self.on_connected(device),
            CentralEvent::ConnectFailed { detail } => self.fail(
                TransportError::PeerCommunication(format!("connection failed: {detail}")),
            ),
            CentralEvent::CharacteristicsDiscovered {
                characteristics,
                peer_mtu,
            } => self.on_characteristics(characteristics, peer_mtu),
            CentralEvent::CharacteristicRead {
                characteristic,
                value,
            } => self.on_characteristic_read(characteristic, value),
            CentralEvent::Notification {
                characteristic,
                value,
            } => self.on_notification(characteristic, value),
            CentralEvent::ReadyToWrite => self.drain_response_queue(),
            CentralEvent::L2capStreamOpened => self.on_stream_opened(),
            CentralEvent::L2capSent { bytes } => self.on_l2cap_sent(bytes),
            CentralEvent::L2capReceived { message } => self.on_l2cap_received(message),
            CentralEvent::L2capClosed => self.on_l2cap_closed(),
            CentralEvent::Disconnected { detail } => self.fail(
                TransportError::PeerCommunication(format!("peer disconnected: {detail}")),
            ),
        }
    }

    /// Drive the signed response out through the committed flow. Valid only
    /// while the engine waits in `SelectingNamespaces`.
    pub fn send_response(&mut self, response: &[u8]) {
        if self.state != HolderMachineState::SelectingNamespaces {
            warn!(state = ?self.state, "response submitted out of order, ignored");
            return;
        }
        self.state = HolderMachineState::SendingResponse;
        match self.flow {
            Some(TransferFlow::L2cap) => {
                debug!(bytes = response.len(), "sending response over L2CAP");
                if let Err(error) = self.stream.begin_send(response.len()) {
                    self.fail(error.into());
                    return;
                }
                if let Err(error) = self.hardware.l2cap_send(response) {
                    self.fail(error);
                }
            }
            _ => {
                let Some(chunk_size) = self.max_chunk_size else {
                    self.fail(TransportError::PeerCommunication(
                        "peer MTU unknown before response transmission".to_string(),
                    ));
                    return;
                };
                match WritingQueue::new(response, chunk_size) {
                    Ok(queue) => {
                        debug!(chunks = queue.progress().1, chunk_size, "sending response");
                        self.writing_queue = Some(queue);
                        self.drain_response_queue();
                    }
                    Err(error) => self.fail(error.into()),
                }
            }
        }
    }

    /// Abort the exchange and release radio resources. Safe in any state;
    /// a no-op once terminal.
    pub fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }
        info!("holder transport canceled");
        self.teardown();
        self.state = HolderMachineState::Canceled;
    }

    fn emit(&mut self, event: HolderTransportEvent) {
        self.events.push(event);
    }

    fn fail(&mut self, error: TransportError) {
        warn!(%error, "holder transport failure");
        self.emit(HolderTransportEvent::Error(error));
        self.teardown();
        self.state = HolderMachineState::Error;
    }

    fn on_radio(&mut self, state: RadioState) {
        match state {
            RadioState::PoweredOn => {
                info!(service = %self.service_uuid, "scanning for engaged service");
                if let Err(error) = self.hardware.start_scan(self.service_uuid) {
                    self.fail(error);
                }
            }
            RadioState::PoweredOff | RadioState::Unauthorized | RadioState::Unsupported => {
                self.fail(TransportError::RadioUnavailable(state))
            }
            RadioState::Resetting | RadioState::Unknown => {
                debug!(%state, "radio state changed")
            }
        }
    }

    fn on_discovered(&mut self, device: DeviceId) {
        if self.state != HolderMachineState::Engaging || self.target.is_some() {
            return;
        }
        debug!(%device, "peer discovered, connecting");
        self.target = Some(device);
        self.hardware.stop_scan();
        if let Err(error) = self.hardware.connect(device) {
            self.fail(error);
        }
    }

    fn on_connected(&mut self, device: DeviceId) {
        if self.target != Some(device) {
            debug!(%device, "connection to unexpected device ignored");
            return;
        }
        info!(%device, "connected");
        self.state = HolderMachineState::Connected;
        self.emit(HolderTransportEvent::Connected);
        if let Err(error) = self.hardware.discover_characteristics(self.service_uuid) {
            self.fail(error);
        }
    }

    fn on_characteristics(&mut self, characteristics: Vec<Uuid>, peer_mtu: usize) {
        if self.state != HolderMachineState::Connected {
            debug!("characteristic discovery outside connection setup ignored");
            return;
        }
        self.capture_chunk_size(peer_mtu);
        for required in [
            ReaderCharacteristic::State,
            ReaderCharacteristic::Client2Server,
            ReaderCharacteristic::Server2Client,
            ReaderCharacteristic::Ident,
        ] {
            if !characteristics.contains(&required.uuid()) {
                self.fail(TransportError::PeerCommunication(format!(
                    "required characteristic missing: {}",
                    characteristic_name(required.uuid())
                )));
                return;
            }
        }

        // Exactly one flow per exchange: L2CAP when both sides support it,
        // the chunked GATT flow otherwise.
        let use_l2cap =
            self.config.use_l2cap && characteristics.contains(&ReaderCharacteristic::L2cap.uuid());
        if use_l2cap {
            self.flow = Some(TransferFlow::L2cap);
            info!(flow = %TransferFlow::L2cap, "transfer flow committed");
            if let Err(error) = self
                .hardware
                .subscribe(ReaderCharacteristic::L2cap.uuid())
                .and_then(|()| self.hardware.read(ReaderCharacteristic::L2cap.uuid()))
            {
                self.fail(error);
            }
        } else {
            self.flow = Some(TransferFlow::LegacyGatt);
            info!(flow = %TransferFlow::LegacyGatt, "transfer flow committed");
            if let Err(error) = self
                .hardware
                .subscribe(ReaderCharacteristic::State.uuid())
                .and_then(|()| self.hardware.subscribe(ReaderCharacteristic::Server2Client.uuid()))
                .and_then(|()| self.hardware.read(ReaderCharacteristic::Ident.uuid()))
            {
                self.fail(error);
            }
        }
    }

    fn on_characteristic_read(&mut self, characteristic: Uuid, value: Vec<u8>) {
        match ReaderCharacteristic::from_uuid(characteristic) {
            Some(ReaderCharacteristic::Ident) => self.on_ident(value),
            Some(ReaderCharacteristic::L2cap) => {
                if value.len() >= PSM_LENGTH {
                    self.on_psm(value);
                } else {
                    // The reader publishes the channel on our read; the PSM
                    // arrives by indication once it is up.
                    debug!("L2CAP characteristic empty, awaiting PSM indication");
                }
            }
            _ => debug!(
                characteristic = %characteristic_name(characteristic),
                "read result ignored"
            ),
        }
    }

    fn on_notification(&mut self, characteristic: Uuid, value: Vec<u8>) {
        match ReaderCharacteristic::from_uuid(characteristic) {
            Some(ReaderCharacteristic::Server2Client) => self.on_request_chunk(value),
            Some(ReaderCharacteristic::Ident) => self.on_ident(value),
            Some(ReaderCharacteristic::L2cap) => self.on_psm(value),
            Some(ReaderCharacteristic::State) => self.on_state_notification(value),
            _ => debug!(
                characteristic = %characteristic_name(characteristic),
                "notification ignored"
            ),
        }
    }

    /// The ident value is the reader's cue that the exchange may begin; the
    /// answer is the 0x01 start signal on the State characteristic.
    fn on_ident(&mut self, value: Vec<u8>) {
        if self.flow != Some(TransferFlow::LegacyGatt) {
            debug!("ident outside the GATT flow ignored");
            return;
        }
        if self.ident.is_some() {
            return;
        }
        debug!(ident = %hex::encode(&value), "reader ident received");
        self.ident = Some(value);
        match self
            .hardware
            .write(ReaderCharacteristic::State.uuid(), &[STATE_START])
        {
            Ok(()) => self.state = HolderMachineState::AwaitingRequest,
            Err(error) => self.fail(error),
        }
    }

    fn on_state_notification(&mut self, value: Vec<u8>) {
        if value == [STATE_END] {
            self.fail(TransportError::PeerCommunication(
                "peer terminated the session".to_string(),
            ));
        } else {
            debug!(value = %hex::encode(&value), "state notification ignored");
        }
    }

    fn on_request_chunk(&mut self, value: Vec<u8>) {
        if self.flow != Some(TransferFlow::LegacyGatt) {
            self.fail(TransportError::ProtocolViolation(
                "request chunk on the GATT flow after committing to L2CAP".to_string(),
            ));
            return;
        }
        match self.reassembler.accept(&value) {
            Ok(ChunkProgress::Partial { chunks_received }) => {
                trace!(chunks_received, "request chunk buffered");
            }
            Ok(ChunkProgress::Complete(message)) => {
                debug!(bytes = message.len(), "request reassembled");
                self.state = HolderMachineState::SelectingNamespaces;
                self.emit(HolderTransportEvent::Message(message));
            }
            Err(error) => self.fail(error.into()),
        }
    }

    fn on_psm(&mut self, value: Vec<u8>) {
        if self.flow != Some(TransferFlow::L2cap) {
            self.fail(TransportError::ProtocolViolation(
                "PSM update outside the L2CAP flow".to_string(),
            ));
            return;
        }
        if self.psm.is_some() {
            return;
        }
        match decode_psm(&value) {
            Ok(psm) => {
                info!(psm, "opening L2CAP channel");
                self.psm = Some(psm);
                if let Err(error) = self.hardware.open_l2cap_channel(psm) {
                    self.fail(error);
                }
            }
            Err(error) => self.fail(TransportError::ProtocolViolation(error.to_string())),
        }
    }

    fn on_stream_opened(&mut self) {
        if let Err(error) = self.stream.opened() {
            self.fail(error.into());
            return;
        }
        debug!("L2CAP stream open, awaiting request");
        self.state = HolderMachineState::AwaitingRequest;
    }

    fn on_l2cap_sent(&mut self, bytes: usize) {
        if self.state != HolderMachineState::SendingResponse {
            return;
        }
        if self.stream.record_sent(bytes) {
            self.complete_success();
        }
    }

    fn on_l2cap_received(&mut self, message: Vec<u8>) {
        if self.flow != Some(TransferFlow::L2cap) {
            self.fail(TransportError::ProtocolViolation(
                "unexpected L2CAP data outside the L2CAP flow".to_string(),
            ));
            return;
        }
        if message.len() > self.config.max_message_size {
            self.fail(
                ChunkError::MessageTooLarge {
                    limit: self.config.max_message_size,
                }
                .into(),
            );
            return;
        }
        debug!(bytes = message.len(), "request received over L2CAP");
        self.state = HolderMachineState::SelectingNamespaces;
        self.emit(HolderTransportEvent::Message(message));
    }

    fn on_l2cap_closed(&mut self) {
        self.stream.close();
        if self.flow == Some(TransferFlow::L2cap)
            && matches!(
                self.state,
                HolderMachineState::AwaitingRequest | HolderMachineState::SendingResponse
            )
        {
            self.fail(TransportError::PeerCommunication(
                "L2CAP stream closed before the exchange completed".to_string(),
            ));
        }
    }

    /// Advance the response queue by exactly one chunk. Called once when
    /// transmission starts and once per ready-to-write event after that.
    fn drain_response_queue(&mut self) {
        if self.state != HolderMachineState::SendingResponse {
            return;
        }
        let next = match self.writing_queue.as_mut() {
            Some(queue) => queue.next_chunk().map(|chunk| {
                let (sent, total) = queue.progress();
                (chunk, sent, total)
            }),
            None => return,
        };
        let Some((chunk, sent, total)) = next else {
            self.writing_queue = None;
            self.complete_success();
            return;
        };
        let last = chunk[0] == CHUNK_FINAL;
        match self
            .hardware
            .write(ReaderCharacteristic::Client2Server.uuid(), &chunk)
        {
            Ok(()) => {
                trace!(sent, total, last, "response chunk written");
                self.emit(HolderTransportEvent::UploadProgress { sent, total });
                if last {
                    self.writing_queue = None;
                    self.complete_success();
                }
            }
            Err(error) => self.fail(error),
        }
    }

    fn complete_success(&mut self) {
        info!("response delivered");
        if self.stream.state() != StreamState::Idle {
            self.hardware.close_l2cap_channel();
            self.stream.close();
        }
        self.emit(HolderTransportEvent::Done);
        self.state = HolderMachineState::Success;
    }

    fn capture_chunk_size(&mut self, peer_mtu: usize) {
        if self.max_chunk_size.is_none() {
            let size = chunk::max_chunk_size(peer_mtu);
            debug!(peer_mtu, size, "chunk size fixed for this transfer");
            self.max_chunk_size = Some(size);
        }
    }

    fn teardown(&mut self) {
        self.hardware.stop_scan();
        if self.stream.state() != StreamState::Idle {
            self.hardware.close_l2cap_channel();
        }
        self.stream.close();
        self.hardware.disconnect();
        self.writing_queue = None;
        self.reassembler.reset();
    }
}
