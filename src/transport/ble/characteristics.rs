//! Characteristic identifiers for the credential presentation GATT services.
//!
//! The protocol defines two distinct services, one per GATT-server role.
//! When the holder acts as the GATT server (holder peripheral engagement)
//! the holder set applies; when the reader acts as the GATT server, as the
//! engines in this crate do, the reader set applies. The two sets never
//! overlap, so a characteristic UUID alone identifies role and purpose.

use serde::{Deserialize, Serialize};
use uuid::{uuid, Uuid};

/// State byte sent by the holder to begin the transfer.
pub const STATE_START: u8 = 0x01;

/// State byte signalling session termination or a rejected transfer.
pub const STATE_END: u8 = 0x02;

const HOLDER_STATE: Uuid = uuid!("00000001-A123-48CE-896B-4C76973373E6");
const HOLDER_CLIENT2SERVER: Uuid = uuid!("00000002-A123-48CE-896B-4C76973373E6");
const HOLDER_SERVER2CLIENT: Uuid = uuid!("00000003-A123-48CE-896B-4C76973373E6");
const HOLDER_L2CAP: Uuid = uuid!("0000000A-A123-48CE-896B-4C76973373E6");

const READER_STATE: Uuid = uuid!("00000005-A123-48CE-896B-4C76973373E6");
const READER_CLIENT2SERVER: Uuid = uuid!("00000006-A123-48CE-896B-4C76973373E6");
const READER_SERVER2CLIENT: Uuid = uuid!("00000007-A123-48CE-896B-4C76973373E6");
const READER_IDENT: Uuid = uuid!("00000008-A123-48CE-896B-4C76973373E6");
const READER_L2CAP: Uuid = uuid!("0000000B-A123-48CE-896B-4C76973373E6");

/// Characteristics of the reader-hosted presentation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReaderCharacteristic {
    /// Transfer state signalling (start byte, termination byte).
    State,
    /// Holder writes, reader receives (response chunks).
    Client2Server,
    /// Reader notifies, holder receives (request chunks).
    Server2Client,
    /// Opaque reader identification value, readable by the holder.
    Ident,
    /// Carries the PSM of the reader's L2CAP channel once published.
    L2cap,
}

impl ReaderCharacteristic {
    pub fn uuid(&self) -> Uuid {
        match self {
            ReaderCharacteristic::State => READER_STATE,
            ReaderCharacteristic::Client2Server => READER_CLIENT2SERVER,
            ReaderCharacteristic::Server2Client => READER_SERVER2CLIENT,
            ReaderCharacteristic::Ident => READER_IDENT,
            ReaderCharacteristic::L2cap => READER_L2CAP,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        match uuid {
            u if u == READER_STATE => Some(ReaderCharacteristic::State),
            u if u == READER_CLIENT2SERVER => Some(ReaderCharacteristic::Client2Server),
            u if u == READER_SERVER2CLIENT => Some(ReaderCharacteristic::Server2Client),
            u if u == READER_IDENT => Some(ReaderCharacteristic::Ident),
            u if u == READER_L2CAP => Some(ReaderCharacteristic::L2cap),
            _ => None,
        }
    }
}

/// Characteristics of the holder-hosted presentation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderCharacteristic {
    State,
    Client2Server,
    Server2Client,
    L2cap,
}

impl HolderCharacteristic {
    pub fn uuid(&self) -> Uuid {
        match self {
            HolderCharacteristic::State => HOLDER_STATE,
            HolderCharacteristic::Client2Server => HOLDER_CLIENT2SERVER,
            HolderCharacteristic::Server2Client => HOLDER_SERVER2CLIENT,
            HolderCharacteristic::L2cap => HOLDER_L2CAP,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        match uuid {
            u if u == HOLDER_STATE => Some(HolderCharacteristic::State),
            u if u == HOLDER_CLIENT2SERVER => Some(HolderCharacteristic::Client2Server),
            u if u == HOLDER_SERVER2CLIENT => Some(HolderCharacteristic::Server2Client),
            u if u == HOLDER_L2CAP => Some(HolderCharacteristic::L2cap),
            _ => None,
        }
    }
}

/// Human-readable characteristic name for log lines and error detail.
pub fn characteristic_name(uuid: Uuid) -> String {
    if let Some(ch) = ReaderCharacteristic::from_uuid(uuid) {
        return match ch {
            ReaderCharacteristic::State => "Reader:State".to_string(),
            ReaderCharacteristic::Client2Server => "Reader:Client2Server".to_string(),
            ReaderCharacteristic::Server2Client => "Reader:Server2Client".to_string(),
            ReaderCharacteristic::Ident => "Reader:Ident".to_string(),
            ReaderCharacteristic::L2cap => "Reader:L2CAP".to_string(),
        };
    }
    if let Some(ch) = HolderCharacteristic::from_uuid(uuid) {
        return match ch {
            HolderCharacteristic::State => "Holder:State".to_string(),
            HolderCharacteristic::Client2Server => "Holder:Client2Server".to_string(),
            HolderCharacteristic::Server2Client => "Holder:Server2Client".to_string(),
            HolderCharacteristic::L2cap => "Holder:L2CAP".to_string(),
        };
    }
    format!("Unknown:{uuid}")
}
