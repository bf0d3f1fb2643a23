//! Async pump for the serialized hardware event channel.
//!
//! The platform stack delivers events for one role object on one queue;
//! the driver preserves that serialization when the surrounding application
//! is async. The session lives behind a shared lock so a cloneable handle
//! can cancel or feed user input from any task without racing the pump.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::negotiation::{CredentialSigner, HolderNegotiation, ReaderNegotiation};
use crate::session::holder::HolderSession;
use crate::session::reader::ReaderSession;
use crate::session::{HolderSessionObserver, ReaderSessionObserver};
use crate::transport::ble::hardware::{
    CentralEvent, CentralHardware, PeripheralEvent, PeripheralHardware,
};

/// A session that consumes hardware events in arrival order.
pub trait EventSink {
    type Event;

    fn handle_event(&mut self, event: Self::Event);

    /// Always safe to invoke; late events after this are ignored.
    fn cancel(&mut self);
}

impl<N, S, O, H> EventSink for HolderSession<N, S, O, H>
where
    N: HolderNegotiation,
    S: CredentialSigner,
    O: HolderSessionObserver,
    H: CentralHardware,
{
    type Event = CentralEvent;

    fn handle_event(&mut self, event: CentralEvent) {
        HolderSession::handle_event(self, event);
    }

    fn cancel(&mut self) {
        HolderSession::cancel(self);
    }
}

impl<N, O, H> EventSink for ReaderSession<N, O, H>
where
    N: ReaderNegotiation,
    O: ReaderSessionObserver<N::Verified>,
    H: PeripheralHardware,
{
    type Event = PeripheralEvent;

    fn handle_event(&mut self, event: PeripheralEvent) {
        ReaderSession::handle_event(self, event);
    }

    fn cancel(&mut self) {
        ReaderSession::cancel(self);
    }
}

/// Drains the event channel into the session until the channel closes.
pub struct SessionDriver<S: EventSink> {
    session: Arc<Mutex<S>>,
    events: mpsc::UnboundedReceiver<S::Event>,
}

/// Cloneable handle onto a driven session.
pub struct SessionHandle<S: EventSink> {
    session: Arc<Mutex<S>>,
}

impl<S: EventSink> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: EventSink> SessionDriver<S> {
    /// Wrap a session, returning the driver, a handle for cancellation and
    /// user input, and the sender the platform shim feeds events into.
    pub fn new(session: S) -> (Self, SessionHandle<S>, mpsc::UnboundedSender<S::Event>) {
        let session = Arc::new(Mutex::new(session));
        let (sender, events) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            session: Arc::clone(&session),
        };
        (Self { session, events }, handle, sender)
    }

    /// Pump events in arrival order. Returns when every sender is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.session.lock().handle_event(event);
        }
        debug!("event channel closed, driver finished");
    }
}

impl<S: EventSink> SessionHandle<S> {
    /// Cancel the session. Safe concurrently with the pump; whichever side
    /// takes the lock first wins and the other sees a terminal session.
    pub fn cancel(&self) {
        self.session.lock().cancel();
    }

    /// Run a closure against the locked session, e.g. to submit the user's
    /// namespace selection.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.session.lock())
    }
}
