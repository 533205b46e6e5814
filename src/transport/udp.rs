use super::{MAX_DATAGRAM, Transport};
use crate::config::NetworkConfig;
use crate::error::{EvseError, Result};
use crate::logging::get_logger;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// UDP socket bound to the charger port
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind(config: &NetworkConfig) -> Result<Self> {
        let logger = get_logger("transport");
        let addr = config.socket_addr()?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| EvseError::transport(format!("Failed to bind {}: {}", addr, e)))?;
        if config.broadcast {
            socket
                .set_broadcast(true)
                .map_err(|e| EvseError::transport(format!("Failed to enable broadcast: {}", e)))?;
        }
        logger.info(&format!("Listening for chargers on udp://{}", addr));
        Ok(Self { socket })
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(buf, addr)
            .await
            .map_err(|e| EvseError::transport(format!("Send to {} failed: {}", addr, e)))?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| EvseError::transport(format!("Receive failed: {}", e)))?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }
}
