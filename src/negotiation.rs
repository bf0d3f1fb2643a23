//! Boundary with the session negotiation layer and the key store.
//!
//! The negotiation layer owns credential cryptography and session-state
//! semantics; the transport consumes it as an opaque service. Inputs and
//! outputs are byte buffers and opaque state handles the transport never
//! interprets beyond length and the chunk prefix it adds itself. The
//! traits are injected at session construction and mocked in tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Namespaces and data items a reader asks for, keyed by namespace, with
/// an intent-to-retain flag per item.
pub type RequestedItems = HashMap<String, HashMap<String, bool>>;

/// Data items the user permitted for release, keyed by document type and
/// namespace.
pub type PermittedItems = HashMap<String, HashMap<String, Vec<String>>>;

/// One document request decoded from the reader's first message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsRequest {
    pub doc_type: String,
    pub namespaces: RequestedItems,
}

/// Opaque failure from the negotiation layer, surfaced with its message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NegotiationError(pub String);

/// Failures from the key-management collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("signing operation failed: {0}")]
    OperationFailed(String),
}

/// Engagement artifacts for the holder role.
#[derive(Debug)]
pub struct Engagement<E> {
    /// Opaque engagement state, handed back on the first inbound message.
    pub state: E,
    /// Scannable engagement payload, e.g. a QR-encodable URI.
    pub qr_uri: String,
}

/// Result of decoding the reader's request on the holder side.
#[derive(Debug)]
pub struct DecodedRequest<S> {
    /// Opaque session handle; replaces the engagement state.
    pub session: S,
    /// What the reader asked for, for the user to act on.
    pub items_requests: Vec<ItemsRequest>,
}

/// Session establishment artifacts for the reader role.
#[derive(Debug)]
pub struct EstablishedSession<S> {
    pub session: S,
    /// Service UUID scoping the exchange, decoded from the engagement URI.
    pub service_uuid: Uuid,
    /// Pre-built request bytes to transmit once the holder is ready.
    pub request: Vec<u8>,
    /// Opaque identification value served on the ident characteristic.
    pub ble_ident: Vec<u8>,
}

/// Holder-side negotiation functions.
pub trait HolderNegotiation {
    type Document;
    type Engaged;
    type Session;

    fn initialize_session(
        &self,
        document: &Self::Document,
        session_id: Uuid,
    ) -> Result<Engagement<Self::Engaged>, NegotiationError>;

    fn handle_request(
        &self,
        state: &Self::Engaged,
        request: &[u8],
    ) -> Result<DecodedRequest<Self::Session>, NegotiationError>;

    /// Returns the bytes the holder must sign.
    fn submit_response(
        &self,
        session: &mut Self::Session,
        permitted: &PermittedItems,
    ) -> Result<Vec<u8>, NegotiationError>;

    /// Returns the final response bytes to put on the wire.
    fn submit_signature(
        &self,
        session: &mut Self::Session,
        signature: &[u8],
    ) -> Result<Vec<u8>, NegotiationError>;
}

/// Reader-side negotiation functions.
pub trait ReaderNegotiation {
    type Session;
    type Verified;

    fn establish_session(
        &self,
        uri: &str,
        requested_items: &RequestedItems,
        trust_anchors: Option<&[String]>,
    ) -> Result<EstablishedSession<Self::Session>, NegotiationError>;

    /// Verifies the holder's response, returning the updated session state
    /// and the verified result.
    fn handle_response(
        &self,
        session: Self::Session,
        response: &[u8],
    ) -> Result<(Self::Session, Self::Verified), NegotiationError>;
}

/// Key-management collaborator: signs the negotiation layer's payload with
/// the key stored under `key_alias`.
pub trait CredentialSigner {
    fn sign(&self, key_alias: &str, payload: &[u8]) -> Result<Vec<u8>, SigningError>;
}
