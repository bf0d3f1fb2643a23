//! BLE proximity transport for mobile credential presentation.
//!
//! Moves a signed document's requested attributes from a holder device to a
//! reader device over Bluetooth Low Energy, ISO/IEC 18013-5 style, in
//! either of two wire flows selected per connection: a legacy GATT
//! chunked-write/notify flow and an L2CAP streaming flow.
//!
//! The crate is the transport engine only. Credential parsing, CBOR/COSE,
//! key lifecycle and session cryptography live behind the opaque
//! [`negotiation`] traits; the radio lives behind the hardware traits in
//! [`transport::ble::hardware`]. A platform shim implements both sides and
//! feeds hardware events into a [`session::HolderSession`] or
//! [`session::ReaderSession`], directly or through the async
//! [`session::SessionDriver`].

pub mod negotiation;
pub mod session;
pub mod transport;

pub use negotiation::{
    CredentialSigner, HolderNegotiation, ItemsRequest, NegotiationError, PermittedItems,
    ReaderNegotiation, RequestedItems, SigningError,
};
pub use session::{
    HolderSession, HolderSessionError, HolderSessionObserver, HolderSessionState, ReaderSession,
    ReaderSessionError, ReaderSessionObserver, ReaderSessionState, SessionDriver, SessionHandle,
};
pub use transport::ble::{BleTransportConfig, TransferFlow};
pub use transport::TransportError;
