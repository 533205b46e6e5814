//! Raw datagram dump for protocol debugging
//!
//! When enabled every buffer sent or received is logged as hex next to its
//! decoded form and published on a broadcast channel. Receivers that fall
//! behind lose records; the communicator never waits on them.

use crate::logging::get_logger;
use crate::protocol::fields::to_hex;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DumpDirection {
    Received,
    Sent,
}

impl std::fmt::Display for DumpDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpDirection::Received => f.write_str("<-"),
            DumpDirection::Sent => f.write_str("->"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DumpRecord {
    pub direction: DumpDirection,
    pub peer: SocketAddr,
    pub at: DateTime<Utc>,
    pub bytes: Vec<u8>,
    /// Decoded summary, or the decode error
    pub decoded: String,
}

impl DumpRecord {
    pub fn hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

impl std::fmt::Display for DumpRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} ({} bytes) {}",
            self.direction,
            self.peer,
            self.decoded,
            self.bytes.len(),
            self.hex()
        )
    }
}

pub struct DatagramDump {
    enabled: bool,
    tx: broadcast::Sender<DumpRecord>,
    logger: crate::logging::StructuredLogger,
}

impl DatagramDump {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            enabled,
            tx,
            logger: get_logger("dump"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DumpRecord> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<DumpRecord> {
        self.tx.clone()
    }

    pub fn record(
        &self,
        direction: DumpDirection,
        peer: SocketAddr,
        bytes: &[u8],
        decoded: impl FnOnce() -> String,
    ) {
        if !self.enabled {
            return;
        }
        let record = DumpRecord {
            direction,
            peer,
            at: Utc::now(),
            bytes: bytes.to_vec(),
            decoded: decoded(),
        };
        self.logger.info(&record.to_string());
        let _ = self.tx.send(record);
    }
}
