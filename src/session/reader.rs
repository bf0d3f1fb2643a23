//! Reader-side session lifecycle adapter.
//!
//! Owns the reader transport engine for one exchange and forwards the
//! reassembled response to the negotiation layer for verification.

use tracing::debug;
use uuid::Uuid;

use crate::negotiation::{NegotiationError, ReaderNegotiation, RequestedItems};
use crate::session::{ReaderSessionError, ReaderSessionObserver, ReaderSessionState};
use crate::transport::ble::config::BleTransportConfig;
use crate::transport::ble::hardware::{PeripheralEvent, PeripheralHardware};
use crate::transport::ble::reader::{ReaderBlePeripheral, ReaderTransportEvent};

/// One reader-side exchange over BLE.
pub struct ReaderSession<N, O, H>
where
    N: ReaderNegotiation,
    O: ReaderSessionObserver<N::Verified>,
    H: PeripheralHardware,
{
    negotiation: N,
    observer: O,
    engine: ReaderBlePeripheral<H>,
    session: Option<N::Session>,
    service_uuid: Uuid,
}

impl<N, O, H> ReaderSession<N, O, H>
where
    N: ReaderNegotiation,
    O: ReaderSessionObserver<N::Verified>,
    H: PeripheralHardware,
{
    /// Establish a session from a scanned engagement URI. The negotiation
    /// layer supplies the service UUID, the pre-built request and the ident
    /// payload that seed the peripheral.
    pub fn new(
        negotiation: N,
        observer: O,
        hardware: H,
        uri: &str,
        requested_items: &RequestedItems,
        trust_anchors: Option<&[String]>,
        config: BleTransportConfig,
    ) -> Result<Self, NegotiationError> {
        let established = negotiation.establish_session(uri, requested_items, trust_anchors)?;
        let service_uuid = established.service_uuid;
        let engine = ReaderBlePeripheral::new(
            hardware,
            service_uuid,
            established.request,
            established.ble_ident,
            config,
        );
        debug!(service = %service_uuid, "reader session established");
        Ok(Self {
            negotiation,
            observer,
            engine,
            session: Some(established.session),
            service_uuid,
        })
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    /// Feed one hardware event and dispatch whatever it produced.
    pub fn handle_event(&mut self, event: PeripheralEvent) {
        self.engine.handle_event(event);
        self.dispatch();
    }

    /// Cancel the exchange and release the BLE stack. The observer receives
    /// exactly one terminal notification.
    pub fn cancel(&mut self) {
        if self.engine.is_terminal() {
            return;
        }
        self.engine.cancel();
        self.observer.update(ReaderSessionState::Canceled);
    }

    fn dispatch(&mut self) {
        for event in self.engine.drain_events() {
            match event {
                ReaderTransportEvent::Advertising => {
                    self.observer.update(ReaderSessionState::Advertising);
                }
                ReaderTransportEvent::Connected => {
                    self.observer.update(ReaderSessionState::Connected);
                }
                ReaderTransportEvent::DownloadProgress(received) => {
                    self.observer
                        .update(ReaderSessionState::DownloadProgress(received));
                }
                ReaderTransportEvent::Message(data) => self.on_response(data),
                ReaderTransportEvent::Error(error) => {
                    self.observer
                        .update(ReaderSessionState::Error(error.into()));
                    self.engine.cancel();
                }
            }
        }
    }

    fn on_response(&mut self, data: Vec<u8>) {
        let Some(session) = self.session.take() else {
            self.observer.update(ReaderSessionState::Error(
                ReaderSessionError::Generic("response received out of order".to_string()),
            ));
            self.engine.cancel();
            return;
        };
        match self.negotiation.handle_response(session, &data) {
            Ok((session, verified)) => {
                self.session = Some(session);
                self.observer.update(ReaderSessionState::Success(verified));
            }
            Err(error) => {
                self.observer.update(ReaderSessionState::Error(
                    ReaderSessionError::Generic(error.to_string()),
                ));
                self.engine.cancel();
            }
        }
    }
}
