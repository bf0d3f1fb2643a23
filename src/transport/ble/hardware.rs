//! Platform BLE primitive boundary.
//!
//! The engines in this crate never touch a radio. A platform shim
//! implements the command traits below and feeds the matching event enum
//! into the engine in arrival order; the platform stack's per-role delivery
//! queue provides the serialization the state machines rely on.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::transport::TransportError;

/// Radio availability as reported by the platform stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Resetting,
    Unknown,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioState::PoweredOn => "powered on",
            RadioState::PoweredOff => "powered off",
            RadioState::Unauthorized => "unauthorized",
            RadioState::Unsupported => "unsupported",
            RadioState::Resetting => "resetting",
            RadioState::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Opaque platform token for a discovered peer device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Properties a published characteristic supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// One characteristic within a service definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicDefinition {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    /// Static value served on reads (the ident characteristic).
    pub value: Option<Vec<u8>>,
}

/// A GATT service to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDefinition>,
}

/// Commands the reader engine issues against the platform peripheral role.
pub trait PeripheralHardware {
    fn publish_service(&mut self, service: &ServiceDefinition) -> Result<(), TransportError>;
    fn start_advertising(&mut self, service_uuid: Uuid) -> Result<(), TransportError>;
    fn stop_advertising(&mut self);
    /// Push a value to subscribed centrals. `Ok(false)` means the platform
    /// transmit queue is full; a `ReadyToNotify` event follows when it
    /// drains and the caller retries then.
    fn notify(&mut self, characteristic: Uuid, value: &[u8]) -> Result<bool, TransportError>;
    fn publish_l2cap_channel(&mut self, encrypted: bool) -> Result<(), TransportError>;
    fn l2cap_send(&mut self, data: &[u8]) -> Result<(), TransportError>;
    fn close_l2cap_channel(&mut self);
    fn disconnect(&mut self);
}

/// Events the platform peripheral role delivers to the reader engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    Radio(RadioState),
    /// A central subscribed to notifications on a characteristic.
    Subscribed { characteristic: Uuid },
    /// A central issued a read. `peer_mtu` is the maximum update length
    /// the link supports for this central.
    ReadRequest { characteristic: Uuid, peer_mtu: usize },
    /// A central wrote a value.
    Write {
        characteristic: Uuid,
        value: Vec<u8>,
        peer_mtu: usize,
    },
    /// The platform transmit queue has space again.
    ReadyToNotify,
    L2capChannelPublished { psm: u16 },
    L2capChannelFailed { detail: String },
    L2capStreamOpened,
    L2capSent { bytes: usize },
    /// One complete inbound message from the L2CAP stream. The platform
    /// shim reassembles the stream burst before delivering it.
    L2capReceived { message: Vec<u8> },
    L2capClosed,
}

/// Commands the holder engine issues against the platform central role.
pub trait CentralHardware {
    fn start_scan(&mut self, service_uuid: Uuid) -> Result<(), TransportError>;
    fn stop_scan(&mut self);
    fn connect(&mut self, device: DeviceId) -> Result<(), TransportError>;
    fn discover_characteristics(&mut self, service_uuid: Uuid) -> Result<(), TransportError>;
    fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError>;
    fn read(&mut self, characteristic: Uuid) -> Result<(), TransportError>;
    /// Write without response. Pacing is event-driven: the engine sends one
    /// chunk, then waits for `ReadyToWrite` before the next.
    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError>;
    fn open_l2cap_channel(&mut self, psm: u16) -> Result<(), TransportError>;
    fn l2cap_send(&mut self, data: &[u8]) -> Result<(), TransportError>;
    fn close_l2cap_channel(&mut self);
    fn disconnect(&mut self);
}

/// Events the platform central role delivers to the holder engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    Radio(RadioState),
    DeviceDiscovered { device: DeviceId },
    Connected { device: DeviceId },
    ConnectFailed { detail: String },
    /// Characteristic discovery on the target service finished.
    CharacteristicsDiscovered {
        characteristics: Vec<Uuid>,
        peer_mtu: usize,
    },
    /// A read issued with [`CentralHardware::read`] completed.
    CharacteristicRead { characteristic: Uuid, value: Vec<u8> },
    /// A subscribed characteristic changed value.
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// The link can accept the next write.
    ReadyToWrite,
    L2capStreamOpened,
    L2capSent { bytes: usize },
    /// One complete inbound message from the L2CAP stream.
    L2capReceived { message: Vec<u8> },
    L2capClosed,
    Disconnected { detail: String },
}
