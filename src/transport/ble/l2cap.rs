//! L2CAP stream wrapper.
//!
//! Thin byte-stream state over an L2CAP channel: the PSM wire encoding
//! pushed through the L2CAP characteristic, the open/close lifecycle, and
//! sent-byte accounting against the outbound message length. The stream
//! carries whole messages; chunk framing is the legacy GATT flow's concern.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire length of a PSM value on the L2CAP characteristic.
pub const PSM_LENGTH: usize = 2;

/// Errors for L2CAP channel handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum L2capError {
    #[error("L2CAP stream is not open")]
    NotOpen,
    #[error("L2CAP stream is already open")]
    AlreadyOpen,
    #[error("PSM value truncated: got {0} bytes, need {PSM_LENGTH}")]
    TruncatedPsm(usize),
}

/// Encode a PSM for the L2CAP characteristic. Both roles fix little-endian
/// byte order so the value survives the characteristic round-trip.
pub fn encode_psm(psm: u16) -> [u8; PSM_LENGTH] {
    psm.to_le_bytes()
}

/// Decode a PSM received from the L2CAP characteristic.
pub fn decode_psm(value: &[u8]) -> Result<u16, L2capError> {
    if value.len() < PSM_LENGTH {
        return Err(L2capError::TruncatedPsm(value.len()));
    }
    Ok(u16::from_le_bytes([value[0], value[1]]))
}

/// Lifecycle of the negotiated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// No channel negotiated.
    Idle,
    /// PSM known, waiting for the peer to open the stream.
    AwaitingOpen,
    /// Stream open, data may flow.
    Open,
    /// Stream released.
    Closed,
}

/// Stream-side state owned by a transport engine.
#[derive(Debug)]
pub struct L2capStream {
    state: StreamState,
    psm: Option<u16>,
    outbound_len: usize,
    bytes_sent: usize,
}

impl Default for L2capStream {
    fn default() -> Self {
        Self::new()
    }
}

impl L2capStream {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            psm: None,
            outbound_len: 0,
            bytes_sent: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn psm(&self) -> Option<u16> {
        self.psm
    }

    pub fn is_open(&self) -> bool {
        self.state == StreamState::Open
    }

    /// Record the published PSM and wait for the peer to open a stream.
    pub fn await_open(&mut self, psm: u16) -> Result<(), L2capError> {
        match self.state {
            StreamState::Idle => {
                self.psm = Some(psm);
                self.state = StreamState::AwaitingOpen;
                Ok(())
            }
            StreamState::AwaitingOpen | StreamState::Open => Err(L2capError::AlreadyOpen),
            StreamState::Closed => Err(L2capError::NotOpen),
        }
    }

    /// The stream opened. Valid from `Idle` too: the opening side learns
    /// the PSM out of band and never passes through `AwaitingOpen`.
    pub fn opened(&mut self) -> Result<(), L2capError> {
        match self.state {
            StreamState::Idle | StreamState::AwaitingOpen => {
                self.state = StreamState::Open;
                Ok(())
            }
            StreamState::Open => Err(L2capError::AlreadyOpen),
            StreamState::Closed => Err(L2capError::NotOpen),
        }
    }

    /// Begin tracking an outbound message of `total` bytes.
    pub fn begin_send(&mut self, total: usize) -> Result<(), L2capError> {
        if self.state != StreamState::Open {
            return Err(L2capError::NotOpen);
        }
        self.outbound_len = total;
        self.bytes_sent = 0;
        Ok(())
    }

    /// Record bytes the platform confirmed sent; `true` once the whole
    /// outbound message is on the wire.
    pub fn record_sent(&mut self, bytes: usize) -> bool {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes);
        self.bytes_sent >= self.outbound_len
    }

    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }
}
