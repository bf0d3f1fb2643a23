//! Shared test doubles: recording hardware fakes, fake negotiation layers,
//! recording observers, and an in-process link that shuttles commands from
//! one role's hardware into the other role's event stream.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use uuid::Uuid;

use mdoc_ble::negotiation::{
    CredentialSigner, DecodedRequest, Engagement, EstablishedSession, HolderNegotiation,
    ItemsRequest, NegotiationError, PermittedItems, ReaderNegotiation, RequestedItems,
    SigningError,
};
use mdoc_ble::session::{
    HolderSession, HolderSessionObserver, HolderSessionState, ReaderSession,
    ReaderSessionObserver, ReaderSessionState,
};
use mdoc_ble::transport::ble::hardware::{
    CentralEvent, CentralHardware, DeviceId, PeripheralEvent, PeripheralHardware,
    ServiceDefinition,
};
use mdoc_ble::transport::ble::ReaderCharacteristic;
use mdoc_ble::transport::TransportError;

pub const LINK_MTU: usize = 16;
pub const LINK_PSM: u16 = 0x0080;
pub const LINK_DEVICE: DeviceId = DeviceId(1);

/// Install a subscriber once so RUST_LOG=debug surfaces engine transitions
/// while a test runs.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ---------------------------------------------------------------------------
// Recording hardware fakes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralCommand {
    PublishService(ServiceDefinition),
    StartAdvertising(Uuid),
    StopAdvertising,
    Notify(Uuid, Vec<u8>),
    PublishL2cap,
    L2capSend(Vec<u8>),
    CloseL2cap,
    Disconnect,
}

/// Peripheral fake whose command log is shared with the test body.
#[derive(Clone, Default)]
pub struct SharedPeripheral {
    pub commands: Rc<RefCell<Vec<PeripheralCommand>>>,
}

impl SharedPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: PeripheralCommand) {
        self.commands.borrow_mut().push(command);
    }
}

impl PeripheralHardware for SharedPeripheral {
    fn publish_service(&mut self, service: &ServiceDefinition) -> Result<(), TransportError> {
        self.push(PeripheralCommand::PublishService(service.clone()));
        Ok(())
    }

    fn start_advertising(&mut self, service_uuid: Uuid) -> Result<(), TransportError> {
        self.push(PeripheralCommand::StartAdvertising(service_uuid));
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.push(PeripheralCommand::StopAdvertising);
    }

    fn notify(&mut self, characteristic: Uuid, value: &[u8]) -> Result<bool, TransportError> {
        self.push(PeripheralCommand::Notify(characteristic, value.to_vec()));
        Ok(true)
    }

    fn publish_l2cap_channel(&mut self, _encrypted: bool) -> Result<(), TransportError> {
        self.push(PeripheralCommand::PublishL2cap);
        Ok(())
    }

    fn l2cap_send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.push(PeripheralCommand::L2capSend(data.to_vec()));
        Ok(())
    }

    fn close_l2cap_channel(&mut self) {
        self.push(PeripheralCommand::CloseL2cap);
    }

    fn disconnect(&mut self) {
        self.push(PeripheralCommand::Disconnect);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CentralCommand {
    StartScan(Uuid),
    StopScan,
    Connect(DeviceId),
    Discover(Uuid),
    Subscribe(Uuid),
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    OpenL2cap(u16),
    L2capSend(Vec<u8>),
    CloseL2cap,
    Disconnect,
}

/// Central fake whose command log is shared with the test body.
#[derive(Clone, Default)]
pub struct SharedCentral {
    pub commands: Rc<RefCell<Vec<CentralCommand>>>,
}

impl SharedCentral {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, command: CentralCommand) {
        self.commands.borrow_mut().push(command);
    }
}

impl CentralHardware for SharedCentral {
    fn start_scan(&mut self, service_uuid: Uuid) -> Result<(), TransportError> {
        self.push(CentralCommand::StartScan(service_uuid));
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.push(CentralCommand::StopScan);
    }

    fn connect(&mut self, device: DeviceId) -> Result<(), TransportError> {
        self.push(CentralCommand::Connect(device));
        Ok(())
    }

    fn discover_characteristics(&mut self, service_uuid: Uuid) -> Result<(), TransportError> {
        self.push(CentralCommand::Discover(service_uuid));
        Ok(())
    }

    fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        self.push(CentralCommand::Subscribe(characteristic));
        Ok(())
    }

    fn read(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        self.push(CentralCommand::Read(characteristic));
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        self.push(CentralCommand::Write(characteristic, value.to_vec()));
        Ok(())
    }

    fn open_l2cap_channel(&mut self, psm: u16) -> Result<(), TransportError> {
        self.push(CentralCommand::OpenL2cap(psm));
        Ok(())
    }

    fn l2cap_send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.push(CentralCommand::L2capSend(data.to_vec()));
        Ok(())
    }

    fn close_l2cap_channel(&mut self) {
        self.push(CentralCommand::CloseL2cap);
    }

    fn disconnect(&mut self) {
        self.push(CentralCommand::Disconnect);
    }
}

// ---------------------------------------------------------------------------
// Recording observers
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct HolderObserver {
    pub states: Rc<RefCell<Vec<HolderSessionState>>>,
}

impl HolderObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<HolderSessionState> {
        self.states.borrow().clone()
    }
}

impl HolderSessionObserver for HolderObserver {
    fn update(&self, state: HolderSessionState) {
        self.states.borrow_mut().push(state);
    }
}

#[derive(Clone, Default)]
pub struct ReaderObserver {
    pub states: Rc<RefCell<Vec<ReaderSessionState<String>>>>,
}

impl ReaderObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<ReaderSessionState<String>> {
        self.states.borrow().clone()
    }
}

impl ReaderSessionObserver<String> for ReaderObserver {
    fn update(&self, state: ReaderSessionState<String>) {
        self.states.borrow_mut().push(state);
    }
}

// ---------------------------------------------------------------------------
// Fake negotiation layers
// ---------------------------------------------------------------------------

/// Holder-side negotiation fake. Records the request it decoded and hands
/// back configured response bytes after the sign path runs.
#[derive(Clone)]
pub struct FakeHolderNegotiation {
    pub response: Vec<u8>,
    pub seen_request: Rc<RefCell<Option<Vec<u8>>>>,
    pub seen_signature: Rc<RefCell<Option<Vec<u8>>>>,
}

impl FakeHolderNegotiation {
    pub fn new(response: Vec<u8>) -> Self {
        Self {
            response,
            seen_request: Rc::new(RefCell::new(None)),
            seen_signature: Rc::new(RefCell::new(None)),
        }
    }
}

impl HolderNegotiation for FakeHolderNegotiation {
    type Document = Vec<u8>;
    type Engaged = String;
    type Session = String;

    fn initialize_session(
        &self,
        _document: &Vec<u8>,
        session_id: Uuid,
    ) -> Result<Engagement<String>, NegotiationError> {
        Ok(Engagement {
            state: "engaged".to_string(),
            qr_uri: format!("mdoc:{session_id}"),
        })
    }

    fn handle_request(
        &self,
        _state: &String,
        request: &[u8],
    ) -> Result<DecodedRequest<String>, NegotiationError> {
        *self.seen_request.borrow_mut() = Some(request.to_vec());
        let mut namespaces = RequestedItems::new();
        namespaces.insert(
            "org.iso.18013.5.1".to_string(),
            HashMap::from([("age_over_21".to_string(), false)]),
        );
        Ok(DecodedRequest {
            session: "in-session".to_string(),
            items_requests: vec![ItemsRequest {
                doc_type: "org.iso.18013.5.1.mDL".to_string(),
                namespaces,
            }],
        })
    }

    fn submit_response(
        &self,
        _session: &mut String,
        _permitted: &PermittedItems,
    ) -> Result<Vec<u8>, NegotiationError> {
        Ok(b"payload-to-sign".to_vec())
    }

    fn submit_signature(
        &self,
        _session: &mut String,
        signature: &[u8],
    ) -> Result<Vec<u8>, NegotiationError> {
        *self.seen_signature.borrow_mut() = Some(signature.to_vec());
        Ok(self.response.clone())
    }
}

/// Reader-side negotiation fake seeded with the session artifacts.
pub struct FakeReaderNegotiation {
    pub service_uuid: Uuid,
    pub request: Vec<u8>,
    pub ble_ident: Vec<u8>,
    pub fail_verification: bool,
}

impl FakeReaderNegotiation {
    pub fn new(service_uuid: Uuid, request: Vec<u8>, ble_ident: Vec<u8>) -> Self {
        Self {
            service_uuid,
            request,
            ble_ident,
            fail_verification: false,
        }
    }
}

impl ReaderNegotiation for FakeReaderNegotiation {
    type Session = String;
    type Verified = String;

    fn establish_session(
        &self,
        _uri: &str,
        _requested_items: &RequestedItems,
        _trust_anchors: Option<&[String]>,
    ) -> Result<EstablishedSession<String>, NegotiationError> {
        Ok(EstablishedSession {
            session: "established".to_string(),
            service_uuid: self.service_uuid,
            request: self.request.clone(),
            ble_ident: self.ble_ident.clone(),
        })
    }

    fn handle_response(
        &self,
        session: String,
        response: &[u8],
    ) -> Result<(String, String), NegotiationError> {
        if self.fail_verification {
            return Err(NegotiationError("response verification failed".to_string()));
        }
        Ok((session, format!("verified:{}", hex::encode(response))))
    }
}

/// Signer producing a fixed signature.
pub struct FakeSigner;

impl CredentialSigner for FakeSigner {
    fn sign(&self, _key_alias: &str, _payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        Ok(b"der-signature".to_vec())
    }
}

/// Signer whose key lookup always fails.
pub struct MissingKeySigner;

impl CredentialSigner for MissingKeySigner {
    fn sign(&self, key_alias: &str, _payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        Err(SigningError::KeyNotFound(key_alias.to_string()))
    }
}

// ---------------------------------------------------------------------------
// In-process link
// ---------------------------------------------------------------------------

pub type TestHolderSession<S> =
    HolderSession<FakeHolderNegotiation, S, HolderObserver, SharedCentral>;
pub type TestReaderSession =
    ReaderSession<FakeReaderNegotiation, ReaderObserver, SharedPeripheral>;

/// Shuttles recorded hardware commands from each role into the other
/// role's event stream until both sides go quiet, emulating the radio
/// link and the platform callbacks on both ends.
pub struct Link {
    pub holder_commands: Rc<RefCell<Vec<CentralCommand>>>,
    pub reader_commands: Rc<RefCell<Vec<PeripheralCommand>>>,
    service: Option<ServiceDefinition>,
}

impl Link {
    pub fn new(
        holder_commands: Rc<RefCell<Vec<CentralCommand>>>,
        reader_commands: Rc<RefCell<Vec<PeripheralCommand>>>,
    ) -> Self {
        Self {
            holder_commands,
            reader_commands,
            service: None,
        }
    }

    fn ident_value(&self) -> Vec<u8> {
        self.service
            .as_ref()
            .and_then(|service| {
                service
                    .characteristics
                    .iter()
                    .find(|ch| ch.uuid == ReaderCharacteristic::Ident.uuid())
            })
            .and_then(|ch| ch.value.clone())
            .unwrap_or_default()
    }

    fn discovered_characteristics(&self) -> Vec<Uuid> {
        self.service
            .as_ref()
            .map(|service| service.characteristics.iter().map(|ch| ch.uuid).collect())
            .unwrap_or_default()
    }

    /// Run both sides to a fixed point.
    pub fn pump<S: CredentialSigner>(
        &mut self,
        holder: &mut TestHolderSession<S>,
        reader: &mut TestReaderSession,
    ) {
        loop {
            let reader_commands: Vec<PeripheralCommand> =
                self.reader_commands.borrow_mut().drain(..).collect();
            let holder_commands: Vec<CentralCommand> =
                self.holder_commands.borrow_mut().drain(..).collect();
            if reader_commands.is_empty() && holder_commands.is_empty() {
                break;
            }

            for command in reader_commands {
                match command {
                    PeripheralCommand::PublishService(service) => {
                        self.service = Some(service);
                    }
                    PeripheralCommand::Notify(characteristic, value) => {
                        holder.handle_event(CentralEvent::Notification {
                            characteristic,
                            value,
                        });
                        reader.handle_event(PeripheralEvent::ReadyToNotify);
                    }
                    PeripheralCommand::PublishL2cap => {
                        reader.handle_event(PeripheralEvent::L2capChannelPublished {
                            psm: LINK_PSM,
                        });
                    }
                    PeripheralCommand::L2capSend(data) => {
                        reader.handle_event(PeripheralEvent::L2capSent { bytes: data.len() });
                        holder.handle_event(CentralEvent::L2capReceived { message: data });
                    }
                    PeripheralCommand::StartAdvertising(_)
                    | PeripheralCommand::StopAdvertising
                    | PeripheralCommand::CloseL2cap
                    | PeripheralCommand::Disconnect => {}
                }
            }

            for command in holder_commands {
                match command {
                    CentralCommand::StartScan(_) => {
                        holder.handle_event(CentralEvent::DeviceDiscovered {
                            device: LINK_DEVICE,
                        });
                    }
                    CentralCommand::Connect(device) => {
                        holder.handle_event(CentralEvent::Connected { device });
                    }
                    CentralCommand::Discover(_) => {
                        let characteristics = self.discovered_characteristics();
                        holder.handle_event(CentralEvent::CharacteristicsDiscovered {
                            characteristics,
                            peer_mtu: LINK_MTU,
                        });
                    }
                    CentralCommand::Subscribe(characteristic) => {
                        reader.handle_event(PeripheralEvent::Subscribed { characteristic });
                    }
                    CentralCommand::Read(characteristic) => {
                        reader.handle_event(PeripheralEvent::ReadRequest {
                            characteristic,
                            peer_mtu: LINK_MTU,
                        });
                        let value = if characteristic == ReaderCharacteristic::Ident.uuid() {
                            self.ident_value()
                        } else {
                            Vec::new()
                        };
                        holder.handle_event(CentralEvent::CharacteristicRead {
                            characteristic,
                            value,
                        });
                    }
                    CentralCommand::Write(characteristic, value) => {
                        reader.handle_event(PeripheralEvent::Write {
                            characteristic,
                            value,
                            peer_mtu: LINK_MTU,
                        });
                        holder.handle_event(CentralEvent::ReadyToWrite);
                    }
                    CentralCommand::OpenL2cap(_psm) => {
                        reader.handle_event(PeripheralEvent::L2capStreamOpened);
                        holder.handle_event(CentralEvent::L2capStreamOpened);
                    }
                    CentralCommand::L2capSend(data) => {
                        holder.handle_event(CentralEvent::L2capSent { bytes: data.len() });
                        reader.handle_event(PeripheralEvent::L2capReceived { message: data });
                    }
                    CentralCommand::StopScan
                    | CentralCommand::CloseL2cap
                    | CentralCommand::Disconnect => {}
                }
            }
        }
    }
}
