//! Holder-side session lifecycle adapter.
//!
//! Owns the holder transport engine for one presentation, forwards every
//! complete inbound message to the negotiation layer, runs the sign path
//! when the user submits a selection, and keeps the observer current.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::negotiation::{CredentialSigner, HolderNegotiation, NegotiationError, PermittedItems};
use crate::session::{HolderSessionError, HolderSessionObserver, HolderSessionState};
use crate::transport::ble::config::BleTransportConfig;
use crate::transport::ble::hardware::{CentralEvent, CentralHardware};
use crate::transport::ble::holder::{HolderBleCentral, HolderTransportEvent};

/// Where the opaque negotiation state currently lives.
enum Phase<E, S> {
    /// Engagement produced, no request decoded yet.
    Engaged(E),
    /// First message decoded; the session handle replaced the engagement.
    InSession(S),
    /// The exchange ended one way or another.
    Terminal,
}

/// One holder-side presentation over BLE.
pub struct HolderSession<N, S, O, H>
where
    N: HolderNegotiation,
    S: CredentialSigner,
    O: HolderSessionObserver,
    H: CentralHardware,
{
    negotiation: N,
    signer: S,
    observer: O,
    engine: HolderBleCentral<H>,
    phase: Phase<N::Engaged, N::Session>,
    key_alias: String,
    session_id: Uuid,
}

impl<N, S, O, H> HolderSession<N, S, O, H>
where
    N: HolderNegotiation,
    S: CredentialSigner,
    O: HolderSessionObserver,
    H: CentralHardware,
{
    /// Engage a new presentation. A fresh session UUID scopes the exchange;
    /// the observer immediately receives the QR engagement payload.
    pub fn new(
        negotiation: N,
        signer: S,
        observer: O,
        hardware: H,
        document: &N::Document,
        key_alias: impl Into<String>,
        config: BleTransportConfig,
    ) -> Result<Self, NegotiationError> {
        let session_id = Uuid::new_v4();
        let engagement = negotiation.initialize_session(document, session_id)?;
        let engine = HolderBleCentral::new(hardware, session_id, config);
        let session = Self {
            negotiation,
            signer,
            observer,
            engine,
            phase: Phase::Engaged(engagement.state),
            key_alias: key_alias.into(),
            session_id,
        };
        debug!(session = %session.session_id, "holder session engaged");
        session
            .observer
            .update(HolderSessionState::EngagingQrCode(engagement.qr_uri));
        Ok(session)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Feed one hardware event and dispatch whatever it produced.
    pub fn handle_event(&mut self, event: CentralEvent) {
        self.engine.handle_event(event);
        self.dispatch();
    }

    /// Submit the user's namespace selection: obtain the bytes to sign,
    /// sign them with the credential's key, and drive the response out.
    pub fn submit_namespaces(&mut self, permitted: &PermittedItems) {
        let Phase::InSession(session) = &mut self.phase else {
            warn!("namespace selection without an active session");
            self.observer.update(HolderSessionState::Error(
                HolderSessionError::Generic("no active session".to_string()),
            ));
            self.terminate();
            return;
        };
        let payload = match self.negotiation.submit_response(session, permitted) {
            Ok(payload) => payload,
            Err(error) => {
                self.report_generic(error.to_string());
                return;
            }
        };
        let signature = match self.signer.sign(&self.key_alias, &payload) {
            Ok(signature) => signature,
            Err(error) => {
                self.report_generic(error.to_string());
                return;
            }
        };
        let response = match self.negotiation.submit_signature(session, &signature) {
            Ok(response) => response,
            Err(error) => {
                self.report_generic(error.to_string());
                return;
            }
        };
        self.engine.send_response(&response);
        self.dispatch();
    }

    /// Cancel the request mid-transaction and release the BLE stack. The
    /// observer receives exactly one terminal notification.
    pub fn cancel(&mut self) {
        if self.engine.is_terminal() {
            return;
        }
        self.engine.cancel();
        self.phase = Phase::Terminal;
        self.observer.update(HolderSessionState::Canceled);
    }

    fn dispatch(&mut self) {
        for event in self.engine.drain_events() {
            match event {
                HolderTransportEvent::Connected => {
                    self.observer.update(HolderSessionState::Connected);
                }
                HolderTransportEvent::UploadProgress { sent, total } => {
                    self.observer
                        .update(HolderSessionState::UploadProgress { sent, total });
                }
                HolderTransportEvent::Message(data) => self.on_request(data),
                HolderTransportEvent::Done => {
                    self.phase = Phase::Terminal;
                    self.observer.update(HolderSessionState::Success);
                }
                HolderTransportEvent::Error(error) => {
                    self.observer
                        .update(HolderSessionState::Error(error.into()));
                    self.terminate();
                }
            }
        }
    }

    fn on_request(&mut self, data: Vec<u8>) {
        let Phase::Engaged(engaged) = &self.phase else {
            self.report_generic("request received out of order".to_string());
            return;
        };
        match self.negotiation.handle_request(engaged, &data) {
            Ok(decoded) => {
                self.phase = Phase::InSession(decoded.session);
                self.observer
                    .update(HolderSessionState::SelectNamespaces(decoded.items_requests));
            }
            Err(error) => self.report_generic(error.to_string()),
        }
    }

    /// Report a negotiation or signing failure once, then tear down without
    /// a second terminal notification.
    fn report_generic(&mut self, detail: String) {
        self.observer.update(HolderSessionState::Error(
            HolderSessionError::Generic(detail),
        ));
        self.terminate();
    }

    fn terminate(&mut self) {
        self.engine.cancel();
        self.phase = Phase::Terminal;
    }
}
