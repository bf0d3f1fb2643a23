//! Reader-role transport engine.
//!
//! The reader requests the credential yet acts as the BLE peripheral: it
//! publishes the presentation service under the session's UUID and lets the
//! holder's central connect. The engine is an explicit state machine with a
//! current and a pending state; every requested transition re-evaluates the
//! pair until it reaches a fixed point, so hardware callbacks can never
//! re-enter a half-applied transition.
//!
//! Two mutually exclusive wire flows hang off `ServicePublished`: the
//! peer's first committing interaction (a subscription to the State
//! characteristic, or a read of the L2CAP characteristic) selects the flow,
//! and any committing interaction from the other flow afterwards is a
//! protocol violation that halts the exchange.

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::transport::ble::characteristics::{
    characteristic_name, ReaderCharacteristic, STATE_END, STATE_START,
};
use crate::transport::ble::chunk::{
    self, ChunkError, ChunkProgress, Reassembler, WritingQueue, CHUNK_FINAL,
};
use crate::transport::ble::config::BleTransportConfig;
use crate::transport::ble::hardware::{
    CharacteristicDefinition, CharacteristicProperties, PeripheralEvent, PeripheralHardware,
    RadioState, ServiceDefinition,
};
use crate::transport::ble::l2cap::{encode_psm, L2capStream, StreamState};
use crate::transport::ble::TransferFlow;
use crate::transport::TransportError;

/// States of the reader machine. Exactly one current state and at most one
/// pending state exist at any time; `FatalError` is reachable from every
/// state and drains into the terminal `Halted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReaderMachineState {
    Initial,
    HardwareOn,
    ServicePublished,
    // Legacy GATT flow.
    StateSubscribed,
    AwaitRequestStart,
    SendingRequest,
    AwaitResponse,
    // L2CAP flow.
    L2capRead,
    L2capAwaitChannelPublished,
    L2capChannelPublished,
    L2capStreamOpen,
    L2capSendingRequest,
    L2capAwaitingResponse,
    // Terminal.
    Complete,
    FatalError,
    Halted,
}

/// Events the engine surfaces to the session layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderTransportEvent {
    /// The service is published and advertised.
    Advertising,
    /// A central connected (first subscription observed).
    Connected,
    /// Response chunks received so far.
    DownloadProgress(usize),
    /// A complete inbound message was reassembled.
    Message(Vec<u8>),
    /// The exchange failed; the engine halts after this.
    Error(TransportError),
}

/// Reader transport engine over an injected platform peripheral.
pub struct ReaderBlePeripheral<H: PeripheralHardware> {
    hardware: H,
    service_uuid: Uuid,
    request: Vec<u8>,
    ble_ident: Vec<u8>,
    config: BleTransportConfig,
    state: ReaderMachineState,
    pending: ReaderMachineState,
    draining: bool,
    flow: Option<TransferFlow>,
    max_chunk_size: Option<usize>,
    writing_queue: Option<WritingQueue>,
    reassembler: Reassembler,
    stream: L2capStream,
    connected_reported: bool,
    events: Vec<ReaderTransportEvent>,
}

impl<H: PeripheralHardware> ReaderBlePeripheral<H> {
    pub fn new(
        hardware: H,
        service_uuid: Uuid,
        request: Vec<u8>,
        ble_ident: Vec<u8>,
        config: BleTransportConfig,
    ) -> Self {
        let reassembler = Reassembler::new(config.max_message_size);
        Self {
            hardware,
            service_uuid,
            request,
            ble_ident,
            config,
            state: ReaderMachineState::Initial,
            pending: ReaderMachineState::Initial,
            draining: false,
            flow: None,
            max_chunk_size: None,
            writing_queue: None,
            reassembler,
            stream: L2capStream::new(),
            connected_reported: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ReaderMachineState {
        self.state
    }

    pub fn flow(&self) -> Option<TransferFlow> {
        self.flow
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            ReaderMachineState::Complete | ReaderMachineState::Halted
        )
    }

    /// Events accumulated since the last drain, in emission order.
    pub fn drain_events(&mut self) -> Vec<ReaderTransportEvent> {
        std::mem::take(&mut self.events)
    }

    /// Feed one hardware event. Events arriving after a terminal state are
    /// ignored; late completions must not crash a finished exchange.
    pub fn handle_event(&mut self, event: PeripheralEvent) {
        if self.is_terminal() {
            trace!(?event, "event after terminal state ignored");
            return;
        }
        match event {
            PeripheralEvent::Radio(state) => self.on_radio(state),
            PeripheralEvent::Subscribed { characteristic } => self.on_subscribed(characteristic),
            PeripheralEvent::ReadRequest {
                characteristic,
                peer_mtu,
            } => self.on_read_request(characteristic, peer_mtu),
            PeripheralEvent::Write {
                characteristic,
                value,
                peer_mtu,
            } => self.on_write(characteristic, value, peer_mtu),
            PeripheralEvent::ReadyToNotify => self.drain_writing_queue(),
            PeripheralEvent::L2capChannelPublished { psm } => self.on_channel_published(psm),
            PeripheralEvent::L2capChannelFailed { detail } => self.fail(
                TransportError::PeerCommunication(format!("L2CAP channel publication failed: {detail}")),
            ),
            PeripheralEvent::L2capStreamOpened => self.on_stream_opened(),
            PeripheralEvent::L2capSent { bytes } => self.on_l2cap_sent(bytes),
            PeripheralEvent::L2capReceived { message } => self.on_l2cap_received(message),
            PeripheralEvent::L2capClosed => self.on_l2cap_closed(),
        }
    }

    /// Abort the exchange and release radio resources. Safe in any state;
    /// a no-op once terminal.
    pub fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }
        info!("reader transport canceled");
        self.teardown();
        self.state = ReaderMachineState::Halted;
        self.pending = ReaderMachineState::Halted;
    }

    fn emit(&mut self, event: ReaderTransportEvent) {
        self.events.push(event);
    }

    fn emit_error(&mut self, error: TransportError) {
        warn!(%error, "reader transport failure");
        self.emit(ReaderTransportEvent::Error(error));
    }

    fn fail(&mut self, error: TransportError) {
        self.emit_error(error);
        self.request_transition(ReaderMachineState::FatalError);
    }

    fn request_transition(&mut self, next: ReaderMachineState) {
        self.pending = next;
        self.run_machine();
    }

    /// Re-evaluate the (current, pending) pair until stable. All machine
    /// state mutation happens here; re-entrant requests only update the
    /// pending state and are picked up by the running drain.
    fn run_machine(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        let mut update = true;
        while update {
            update = false;

            // A fatal error preempts whatever the machine was doing.
            if self.pending == ReaderMachineState::FatalError
                && !matches!(
                    self.state,
                    ReaderMachineState::FatalError | ReaderMachineState::Halted
                )
            {
                self.state = ReaderMachineState::FatalError;
            }
            if self.state != self.pending {
                debug!(current = ?self.state, pending = ?self.pending, "reader machine");
            }

            match self.state {
                ReaderMachineState::Initial => {
                    if self.pending == ReaderMachineState::HardwareOn {
                        self.state = ReaderMachineState::HardwareOn;
                        update = true;
                    }
                }
                ReaderMachineState::HardwareOn => {
                    info!(service = %self.service_uuid, "publishing service, advertising");
                    match self.setup_service() {
                        Ok(()) => {
                            self.state = ReaderMachineState::ServicePublished;
                            self.pending = ReaderMachineState::ServicePublished;
                            self.emit(ReaderTransportEvent::Advertising);
                            update = true;
                        }
                        Err(error) => {
                            self.emit_error(error);
                            self.pending = ReaderMachineState::FatalError;
                            update = true;
                        }
                    }
                }
                ReaderMachineState::ServicePublished => {
                    if matches!(
                        self.pending,
                        ReaderMachineState::StateSubscribed | ReaderMachineState::L2capRead
                    ) {
                        self.state = self.pending;
                        update = true;
                    }
                }
                ReaderMachineState::StateSubscribed => {
                    // Notify the ident value; the holder answers with the
                    // 0x01 start signal on the State characteristic.
                    match self
                        .hardware
                        .notify(ReaderCharacteristic::Ident.uuid(), &self.ble_ident)
                    {
                        Ok(_) => {
                            self.state = ReaderMachineState::AwaitRequestStart;
                            self.pending = ReaderMachineState::AwaitRequestStart;
                        }
                        Err(error) => {
                            self.emit_error(error);
                            self.pending = ReaderMachineState::FatalError;
                            update = true;
                        }
                    }
                }
                ReaderMachineState::AwaitRequestStart => {
                    if self.pending == ReaderMachineState::SendingRequest {
                        self.state = ReaderMachineState::SendingRequest;
                        self.begin_request_write();
                        update = true;
                    }
                }
                ReaderMachineState::SendingRequest => {
                    if self.pending == ReaderMachineState::AwaitResponse {
                        self.state = ReaderMachineState::AwaitResponse;
                    }
                }
                ReaderMachineState::AwaitResponse => {
                    if self.pending == ReaderMachineState::Complete {
                        self.state = ReaderMachineState::Complete;
                        self.finish();
                    }
                }
                ReaderMachineState::L2capRead => {
                    self.state = ReaderMachineState::L2capAwaitChannelPublished;
                    self.pending = ReaderMachineState::L2capAwaitChannelPublished;
                    if let Err(error) = self.hardware.publish_l2cap_channel(true) {
                        self.emit_error(error);
                        self.pending = ReaderMachineState::FatalError;
                        update = true;
                    }
                }
                ReaderMachineState::L2capAwaitChannelPublished => {
                    if self.pending == ReaderMachineState::L2capChannelPublished {
                        self.state = ReaderMachineState::L2capChannelPublished;
                    }
                }
                ReaderMachineState::L2capChannelPublished => {
                    if self.pending == ReaderMachineState::L2capStreamOpen {
                        self.state = ReaderMachineState::L2capStreamOpen;
                        update = true;
                    }
                }
                ReaderMachineState::L2capStreamOpen => {
                    // Single-shot request write; the stream frames itself.
                    debug!(bytes = self.request.len(), "sending request over L2CAP");
                    if let Err(error) = self.stream.begin_send(self.request.len()) {
                        self.emit_error(error.into());
                        self.pending = ReaderMachineState::FatalError;
                        update = true;
                    } else {
                        match self.hardware.l2cap_send(&self.request) {
                            Ok(()) => {
                                self.state = ReaderMachineState::L2capSendingRequest;
                                self.pending = ReaderMachineState::L2capSendingRequest;
                            }
                            Err(error) => {
                                self.emit_error(error);
                                self.pending = ReaderMachineState::FatalError;
                                update = true;
                            }
                        }
                    }
                }
                ReaderMachineState::L2capSendingRequest => {
                    if self.pending == ReaderMachineState::L2capAwaitingResponse {
                        self.state = ReaderMachineState::L2capAwaitingResponse;
                    }
                }
                ReaderMachineState::L2capAwaitingResponse => {
                    if self.pending == ReaderMachineState::Complete {
                        self.state = ReaderMachineState::Complete;
                        self.finish();
                    }
                }
                ReaderMachineState::FatalError => {
                    self.state = ReaderMachineState::Halted;
                    self.pending = ReaderMachineState::Halted;
                    self.teardown();
                }
                ReaderMachineState::Complete | ReaderMachineState::Halted => {}
            }
        }
        self.draining = false;
    }

    fn setup_service(&mut self) -> Result<(), TransportError> {
        let mut characteristics = vec![
            CharacteristicDefinition {
                uuid: ReaderCharacteristic::State.uuid(),
                properties: CharacteristicProperties {
                    notify: true,
                    write: true,
                    write_without_response: true,
                    ..Default::default()
                },
                value: None,
            },
            CharacteristicDefinition {
                uuid: ReaderCharacteristic::Client2Server.uuid(),
                properties: CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    ..Default::default()
                },
                value: None,
            },
            CharacteristicDefinition {
                uuid: ReaderCharacteristic::Server2Client.uuid(),
                properties: CharacteristicProperties {
                    notify: true,
                    ..Default::default()
                },
                value: None,
            },
            CharacteristicDefinition {
                uuid: ReaderCharacteristic::Ident.uuid(),
                properties: CharacteristicProperties {
                    read: true,
                    ..Default::default()
                },
                value: Some(self.ble_ident.clone()),
            },
        ];
        if self.config.use_l2cap {
            // Indicate is needed to push the PSM out once the channel is up.
            characteristics.push(CharacteristicDefinition {
                uuid: ReaderCharacteristic::L2cap.uuid(),
                properties: CharacteristicProperties {
                    read: true,
                    indicate: true,
                    ..Default::default()
                },
                value: None,
            });
        }
        let service = ServiceDefinition {
            uuid: self.service_uuid,
            characteristics,
        };
        self.hardware.publish_service(&service)?;
        self.hardware.start_advertising(self.service_uuid)
    }

    fn on_radio(&mut self, state: RadioState) {
        match state {
            RadioState::PoweredOn => self.request_transition(ReaderMachineState::HardwareOn),
            RadioState::PoweredOff | RadioState::Unauthorized | RadioState::Unsupported => {
                self.fail(TransportError::RadioUnavailable(state))
            }
            RadioState::Resetting | RadioState::Unknown => {
                debug!(%state, "radio state changed")
            }
        }
    }

    /// Record the flow the peer committed to. Returns `false` (after
    /// failing the exchange) when the peer already committed to the other
    /// flow.
    fn commit_flow(&mut self, flow: TransferFlow) -> bool {
        match self.flow {
            None => {
                info!(%flow, "transfer flow committed");
                self.flow = Some(flow);
                true
            }
            Some(current) if current == flow => true,
            Some(current) => {
                self.fail(TransportError::ProtocolViolation(format!(
                    "peer initiated the {flow} flow after committing to {current}"
                )));
                false
            }
        }
    }

    fn report_connected(&mut self) {
        if !self.connected_reported {
            self.connected_reported = true;
            self.hardware.stop_advertising();
            self.emit(ReaderTransportEvent::Connected);
        }
    }

    fn on_subscribed(&mut self, characteristic: Uuid) {
        debug!(
            characteristic = %characteristic_name(characteristic),
            "central subscribed"
        );
        self.report_connected();
        match ReaderCharacteristic::from_uuid(characteristic) {
            Some(ReaderCharacteristic::State) => {
                if self.commit_flow(TransferFlow::LegacyGatt) {
                    self.request_transition(ReaderMachineState::StateSubscribed);
                }
            }
            Some(ReaderCharacteristic::L2cap) if self.config.use_l2cap => {
                if self.commit_flow(TransferFlow::L2cap) {
                    self.request_transition(ReaderMachineState::L2capRead);
                }
            }
            _ => {}
        }
    }

    fn on_read_request(&mut self, characteristic: Uuid, peer_mtu: usize) {
        self.capture_chunk_size(peer_mtu);
        match ReaderCharacteristic::from_uuid(characteristic) {
            Some(ReaderCharacteristic::Ident) => {
                debug!("ident read, static value served by the platform");
            }
            Some(ReaderCharacteristic::L2cap) if self.config.use_l2cap => {
                if self.commit_flow(TransferFlow::L2cap) {
                    self.request_transition(ReaderMachineState::L2capRead);
                }
            }
            _ => self.fail(TransportError::PeerCommunication(format!(
                "read on unexpected characteristic {}",
                characteristic_name(characteristic)
            ))),
        }
    }

    fn on_write(&mut self, characteristic: Uuid, value: Vec<u8>, peer_mtu: usize) {
        self.capture_chunk_size(peer_mtu);
        trace!(
            characteristic = %characteristic_name(characteristic),
            bytes = value.len(),
            "processing write"
        );
        match ReaderCharacteristic::from_uuid(characteristic) {
            Some(ReaderCharacteristic::Client2Server) => self.on_response_chunk(value),
            Some(ReaderCharacteristic::State) => self.on_state_write(value),
            _ => self.reject_write(TransportError::PeerCommunication(format!(
                "write on unexpected characteristic {}",
                characteristic_name(characteristic)
            ))),
        }
    }

    fn on_response_chunk(&mut self, value: Vec<u8>) {
        if self.flow == Some(TransferFlow::L2cap) {
            self.reject_write(TransportError::ProtocolViolation(
                "response chunk on the GATT flow after committing to L2CAP".to_string(),
            ));
            return;
        }
        match self.reassembler.accept(&value) {
            Ok(ChunkProgress::Partial { chunks_received }) => {
                self.emit(ReaderTransportEvent::DownloadProgress(chunks_received));
            }
            Ok(ChunkProgress::Complete(message)) => {
                debug!(bytes = message.len(), "response reassembled");
                self.emit(ReaderTransportEvent::Message(message));
                self.request_transition(ReaderMachineState::Complete);
            }
            Err(error) => self.reject_write(error.into()),
        }
    }

    fn on_state_write(&mut self, value: Vec<u8>) {
        if self.flow == Some(TransferFlow::L2cap) {
            self.reject_write(TransportError::ProtocolViolation(
                "state write after committing to L2CAP".to_string(),
            ));
            return;
        }
        if value.len() != 1 {
            self.reject_write(TransportError::ProtocolViolation(format!(
                "state value must be a single byte, got {}",
                value.len()
            )));
            return;
        }
        match value[0] {
            STATE_START => self.request_transition(ReaderMachineState::SendingRequest),
            byte => self.reject_write(TransportError::ProtocolViolation(format!(
                "unknown state byte {byte:#04x}"
            ))),
        }
    }

    /// Refuse an inbound write: push the termination byte so the peer sees
    /// the rejection, then halt.
    fn reject_write(&mut self, error: TransportError) {
        let _ = self
            .hardware
            .notify(ReaderCharacteristic::State.uuid(), &[STATE_END]);
        self.fail(error);
    }

    fn begin_request_write(&mut self) {
        let Some(chunk_size) = self.max_chunk_size else {
            self.emit_error(TransportError::PeerCommunication(
                "peer MTU unknown before request transmission".to_string(),
            ));
            self.pending = ReaderMachineState::FatalError;
            return;
        };
        match WritingQueue::new(&self.request, chunk_size) {
            Ok(queue) => {
                debug!(chunks = queue.progress().1, chunk_size, "sending request");
                self.writing_queue = Some(queue);
                self.drain_writing_queue();
            }
            Err(error) => {
                self.emit_error(error.into());
                self.pending = ReaderMachineState::FatalError;
            }
        }
    }

    /// Advance the writing queue by exactly one chunk. Called once when
    /// transmission starts and once per ready-to-notify event after that.
    fn drain_writing_queue(&mut self) {
        if self.state != ReaderMachineState::SendingRequest {
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
            self.request_transition(ReaderMachineState::AwaitResponse);
            return;
        };
        let last = chunk[0] == CHUNK_FINAL;
        match self
            .hardware
            .notify(ReaderCharacteristic::Server2Client.uuid(), &chunk)
        {
            Ok(true) => {
                trace!(sent, total, last, "request chunk notified");
                if last {
                    self.writing_queue = None;
                    self.request_transition(ReaderMachineState::AwaitResponse);
                }
            }
            Ok(false) => {
                // Platform transmit queue full; retry on the next ready event.
                if let Some(queue) = self.writing_queue.as_mut() {
                    queue.requeue(chunk);
                }
            }
            Err(error) => self.fail(error),
        }
    }

    fn on_channel_published(&mut self, psm: u16) {
        if self.flow != Some(TransferFlow::L2cap) {
            debug!(psm, "channel publication outside the L2CAP flow ignored");
            return;
        }
        if let Err(error) = self.stream.await_open(psm) {
            self.fail(error.into());
            return;
        }
        info!(psm, "L2CAP channel published");
        match self
            .hardware
            .notify(ReaderCharacteristic::L2cap.uuid(), &encode_psm(psm))
        {
            Ok(_) => self.request_transition(ReaderMachineState::L2capChannelPublished),
            Err(error) => self.fail(error),
        }
    }

    fn on_stream_opened(&mut self) {
        if self.flow != Some(TransferFlow::L2cap) {
            self.fail(TransportError::ProtocolViolation(
                "L2CAP stream opened outside the L2CAP flow".to_string(),
            ));
            return;
        }
        if let Err(error) = self.stream.opened() {
            self.fail(error.into());
            return;
        }
        self.request_transition(ReaderMachineState::L2capStreamOpen);
    }

    fn on_l2cap_sent(&mut self, bytes: usize) {
        if self.state != ReaderMachineState::L2capSendingRequest {
            return;
        }
        if self.stream.record_sent(bytes) {
            self.request_transition(ReaderMachineState::L2capAwaitingResponse);
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
        debug!(bytes = message.len(), "response received over L2CAP");
        self.emit(ReaderTransportEvent::Message(message));
        self.request_transition(ReaderMachineState::Complete);
    }

    fn on_l2cap_closed(&mut self) {
        self.stream.close();
        if matches!(
            self.state,
            ReaderMachineState::L2capStreamOpen
                | ReaderMachineState::L2capSendingRequest
                | ReaderMachineState::L2capAwaitingResponse
        ) {
            self.fail(TransportError::PeerCommunication(
                "L2CAP stream closed before the response completed".to_string(),
            ));
        }
    }

    fn capture_chunk_size(&mut self, peer_mtu: usize) {
        if self.max_chunk_size.is_none() {
            let size = chunk::max_chunk_size(peer_mtu);
            debug!(peer_mtu, size, "chunk size fixed for this transfer");
            self.max_chunk_size = Some(size);
        }
    }

    fn finish(&mut self) {
        info!("transfer complete");
        if self.stream.state() != StreamState::Idle {
            self.hardware.close_l2cap_channel();
            self.stream.close();
        }
        self.writing_queue = None;
    }

    fn teardown(&mut self) {
        self.hardware.stop_advertising();
        if self.stream.state() != StreamState::Idle {
            self.hardware.close_l2cap_channel();
        }
        self.stream.close();
        self.hardware.disconnect();
        self.writing_queue = None;
        self.reassembler.reset();
    }
}
