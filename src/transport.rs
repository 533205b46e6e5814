//! Datagram transports
//!
//! The communicator only sees the [`Transport`] trait. [`UdpTransport`] is
//! the real socket; [`ChannelTransport`] feeds packets from memory for tests
//! and capture replay.

use crate::error::Result;
use std::net::SocketAddr;

mod memory;
mod udp;

pub use memory::{ChannelTransport, TransportHandle};
pub use udp::UdpTransport;

/// Largest datagram accepted from the socket
pub const MAX_DATAGRAM: usize = 2048;

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one packet to `addr`
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<()>;

    /// Wait for the next packet and its sender
    ///
    /// An error here is fatal to the communicator.
    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)>;

    /// Local address, when bound to one
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
