//! Recording fakes for the platform hardware traits, shared by the engine
//! unit tests.

use uuid::Uuid;

use crate::transport::ble::hardware::{
    CentralHardware, DeviceId, PeripheralHardware, ServiceDefinition,
};
use crate::transport::TransportError;

/// Peripheral-role fake that records every command.
#[derive(Debug, Default)]
pub struct FakePeripheral {
    pub service: Option<ServiceDefinition>,
    pub advertising: bool,
    pub notified: Vec<(Uuid, Vec<u8>)>,
    /// Value returned from `notify`; `false` simulates a full queue.
    pub notify_accepts: bool,
    pub l2cap_published: bool,
    pub l2cap_sent: Vec<Vec<u8>>,
    pub l2cap_closed: bool,
    pub disconnected: bool,
}

impl FakePeripheral {
    pub fn new() -> Self {
        Self {
            notify_accepts: true,
            ..Default::default()
        }
    }
}

impl PeripheralHardware for FakePeripheral {
    fn publish_service(&mut self, service: &ServiceDefinition) -> Result<(), TransportError> {
        self.service = Some(service.clone());
        Ok(())
    }

    fn start_advertising(&mut self, _service_uuid: Uuid) -> Result<(), TransportError> {
        self.advertising = true;
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.advertising = false;
    }

    fn notify(&mut self, characteristic: Uuid, value: &[u8]) -> Result<bool, TransportError> {
        if !self.notify_accepts {
            return Ok(false);
        }
        self.notified.push((characteristic, value.to_vec()));
        Ok(true)
    }

    fn publish_l2cap_channel(&mut self, _encrypted: bool) -> Result<(), TransportError> {
        self.l2cap_published = true;
        Ok(())
    }

    fn l2cap_send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.l2cap_sent.push(data.to_vec());
        Ok(())
    }

    fn close_l2cap_channel(&mut self) {
        self.l2cap_closed = true;
    }

    fn disconnect(&mut self) {
        self.disconnected = true;
    }
}

/// Central-role fake that records every command.
#[derive(Debug, Default)]
pub struct FakeCentral {
    pub scanning: bool,
    pub connected_to: Option<DeviceId>,
    pub discovery_requested: Option<Uuid>,
    pub subscriptions: Vec<Uuid>,
    pub reads: Vec<Uuid>,
    pub writes: Vec<(Uuid, Vec<u8>)>,
    pub l2cap_opened: Option<u16>,
    pub l2cap_sent: Vec<Vec<u8>>,
    pub l2cap_closed: bool,
    pub disconnected: bool,
}

impl FakeCentral {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CentralHardware for FakeCentral {
    fn start_scan(&mut self, _service_uuid: Uuid) -> Result<(), TransportError> {
        self.scanning = true;
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.scanning = false;
    }

    fn connect(&mut self, device: DeviceId) -> Result<(), TransportError> {
        self.connected_to = Some(device);
        Ok(())
    }

    fn discover_characteristics(&mut self, service_uuid: Uuid) -> Result<(), TransportError> {
        self.discovery_requested = Some(service_uuid);
        Ok(())
    }

    fn subscribe(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        self.subscriptions.push(characteristic);
        Ok(())
    }

    fn read(&mut self, characteristic: Uuid) -> Result<(), TransportError> {
        self.reads.push(characteristic);
        Ok(())
    }

    fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        self.writes.push((characteristic, value.to_vec()));
        Ok(())
    }

    fn open_l2cap_channel(&mut self, psm: u16) -> Result<(), TransportError> {
        self.l2cap_opened = Some(psm);
        Ok(())
    }

    fn l2cap_send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.l2cap_sent.push(data.to_vec());
        Ok(())
    }

    fn close_l2cap_channel(&mut self) {
        self.l2cap_closed = true;
    }

    fn disconnect(&mut self) {
        self.disconnected = true;
    }
}
