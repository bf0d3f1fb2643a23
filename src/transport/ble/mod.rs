//! BLE proximity transport.
//!
//! Protocol-level engines for the two roles of a credential presentation
//! exchange, designed to be driven by platform shims that own the actual
//! radio:
//!
//! - **characteristics**: UUID sets and state bytes of the presentation
//!   services
//! - **chunk**: continuation-prefix codec for the legacy GATT flow
//! - **l2cap**: stream wrapper and PSM wire encoding for the L2CAP flow
//! - **hardware**: command traits and event types at the platform boundary
//! - **holder** / **reader**: the per-role state machines
//!
//! The core logic is testable without BLE hardware.

pub mod characteristics;
pub mod chunk;
pub mod config;
pub mod hardware;
pub mod holder;
pub mod l2cap;
pub mod reader;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use characteristics::{
    characteristic_name, HolderCharacteristic, ReaderCharacteristic, STATE_END, STATE_START,
};
pub use chunk::{
    max_chunk_size, split, ChunkError, ChunkProgress, Reassembler, WritingQueue, CHUNK_FINAL,
    CHUNK_MORE, DEFAULT_MAX_MESSAGE_SIZE, MAX_CHARACTERISTIC_SIZE,
};
pub use config::{BleTransportConfig, ConfigError};
pub use hardware::{
    CentralEvent, CentralHardware, CharacteristicDefinition, CharacteristicProperties, DeviceId,
    PeripheralEvent, PeripheralHardware, RadioState, ServiceDefinition,
};
pub use holder::{HolderBleCentral, HolderMachineState, HolderTransportEvent};
pub use l2cap::{decode_psm, encode_psm, L2capError, L2capStream, StreamState, PSM_LENGTH};
pub use reader::{ReaderBlePeripheral, ReaderMachineState, ReaderTransportEvent};

/// The wire flow one exchange is committed to. At most one of the two is
/// ever active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferFlow {
    /// Chunked writes and notifications over the GATT characteristics.
    LegacyGatt,
    /// Whole messages over a negotiated L2CAP stream.
    L2cap,
}

impl fmt::Display for TransferFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFlow::LegacyGatt => write!(f, "legacy GATT"),
            TransferFlow::L2cap => write!(f, "L2CAP"),
        }
    }
}
