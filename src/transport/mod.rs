//! Proximity transport layer.
//!
//! One engine instance drives one exchange over one freshly generated
//! service identifier; a failed or canceled exchange is terminal and a new
//! engagement requires a new engine.

pub mod ble;

use thiserror::Error;

use crate::transport::ble::chunk::ChunkError;
use crate::transport::ble::hardware::RadioState;
use crate::transport::ble::l2cap::L2capError;

/// Failure taxonomy for a proximity exchange. Every failure is fatal for
/// the exchange it occurs in; restarting requires fresh engagement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bluetooth radio unavailable: {0}")]
    RadioUnavailable(RadioState),
    #[error("peer communication failed: {0}")]
    PeerCommunication(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<ChunkError> for TransportError {
    fn from(err: ChunkError) -> Self {
        TransportError::ProtocolViolation(err.to_string())
    }
}

impl From<L2capError> for TransportError {
    fn from(err: L2capError) -> Self {
        TransportError::PeerCommunication(err.to_string())
    }
}
