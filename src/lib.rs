//! # EmProto - UDP client for EV charging stations
//!
//! Discovers chargers that broadcast on the local network, tracks their
//! presence and live state, logs in with a per-device password and issues
//! commands (start and stop charging, device clock, output current limit).
//!
//! ## Features
//!
//! - **Binary codec**: framing, checksums and typed payloads for every
//!   known command, unknown commands carried through untouched
//! - **Single owner loop**: one Tokio task owns the socket and all device
//!   sessions, callers talk to it through async command methods
//! - **Lifecycle events**: ADDED / CHANGED / REMOVED on a broadcast channel
//! - **Persistence**: passwords and names saved to a JSON device list
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `protocol`: datagram codec and command registry
//! - `transport`: UDP socket and in-memory test transport
//! - `session`: per-device state
//! - `communicator`: event loop, request correlation and lifecycle events
//! - `persistence`: saved device list
//! - `dump`: raw datagram tap
//! - `config`: configuration management and validation
//! - `logging`: structured logging and tracing
//! - `cli`: argument model of the `emproto` binary

#[cfg(feature = "cli")]
pub mod cli;
pub mod communicator;
pub mod config;
pub mod dump;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use communicator::{Communicator, DeviceEvent, EventKind};
pub use config::Config;
pub use error::{EvseError, Result};
pub use session::{DeviceSession, SessionStatus};
