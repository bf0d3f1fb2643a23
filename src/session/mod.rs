//! Session lifecycle layer.
//!
//! Maps transport events onto negotiation calls and observer-facing
//! lifecycle states. The adapters hold no state machine of their own; every
//! call is synchronous and side-effect-only, invoked on the delivery
//! context of the triggering hardware event.

pub mod driver;
pub mod holder;
pub mod reader;

use thiserror::Error;

use crate::negotiation::ItemsRequest;
use crate::transport::TransportError;

pub use driver::{EventSink, SessionDriver, SessionHandle};
pub use holder::HolderSession;
pub use reader::ReaderSession;

/// Holder-side session failure, tagged by origin.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HolderSessionError {
    /// Discovery of or communication with the reader's peripheral failed.
    #[error("peripheral failure: {0}")]
    Peripheral(String),
    /// Bluetooth is unusable, e.g. unauthorized or powered off.
    #[error("bluetooth unavailable: {0}")]
    Bluetooth(String),
    /// Unrecoverable negotiation, signing or protocol failure.
    #[error("{0}")]
    Generic(String),
}

impl From<TransportError> for HolderSessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RadioUnavailable(state) => {
                HolderSessionError::Bluetooth(state.to_string())
            }
            TransportError::PeerCommunication(detail) => HolderSessionError::Peripheral(detail),
            TransportError::ProtocolViolation(detail) => {
                HolderSessionError::Peripheral(format!("protocol violation: {detail}"))
            }
            TransportError::Negotiation(detail) | TransportError::Signing(detail) => {
                HolderSessionError::Generic(detail)
            }
        }
    }
}

/// Reader-side session failure, tagged by origin.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderSessionError {
    /// Communication with the holder failed.
    #[error("server failure: {0}")]
    Server(String),
    /// Bluetooth is unusable, e.g. unauthorized or powered off.
    #[error("bluetooth unavailable: {0}")]
    Bluetooth(String),
    /// Unrecoverable negotiation or protocol failure.
    #[error("{0}")]
    Generic(String),
}

impl From<TransportError> for ReaderSessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RadioUnavailable(state) => {
                ReaderSessionError::Bluetooth(state.to_string())
            }
            TransportError::PeerCommunication(detail) => ReaderSessionError::Server(detail),
            TransportError::ProtocolViolation(detail) => {
                ReaderSessionError::Server(format!("protocol violation: {detail}"))
            }
            TransportError::Negotiation(detail) | TransportError::Signing(detail) => {
                ReaderSessionError::Generic(detail)
            }
        }
    }
}

/// Lifecycle states surfaced to the holder-side observer.
#[derive(Debug, Clone, PartialEq)]
pub enum HolderSessionState {
    /// Display the error message; the session is over.
    Error(HolderSessionError),
    /// Display the engagement payload as a QR code.
    EngagingQrCode(String),
    /// The reader connected.
    Connected,
    /// Let the user choose which values to reveal.
    SelectNamespaces(Vec<ItemsRequest>),
    /// Response chunks sent so far and the total to send.
    UploadProgress { sent: usize, total: usize },
    /// The response was delivered.
    Success,
    /// The session was canceled locally.
    Canceled,
}

/// Lifecycle states surfaced to the reader-side observer. `V` is the
/// negotiation layer's verified-response type.
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderSessionState<V> {
    /// Display the error message; the session is over.
    Error(ReaderSessionError),
    /// Waiting for the holder to connect.
    Advertising,
    /// The holder connected.
    Connected,
    /// Response chunks received so far.
    DownloadProgress(usize),
    /// The verified response.
    Success(V),
    /// The session was canceled locally.
    Canceled,
}

/// Implemented by the consumer to drive its UI from holder session state.
pub trait HolderSessionObserver {
    fn update(&self, state: HolderSessionState);
}

/// Implemented by the consumer to drive its UI from reader session state.
pub trait ReaderSessionObserver<V> {
    fn update(&self, state: ReaderSessionState<V>);
}
