use super::Transport;
use crate::error::{EvseError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};

type Inbound = Result<(Vec<u8>, SocketAddr)>;

/// In-memory transport driven through a [`TransportHandle`]
pub struct ChannelTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    sent_bytes: Arc<AtomicUsize>,
}

/// Test/replay side of a [`ChannelTransport`]
pub struct TransportHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    sent_bytes: Arc<AtomicUsize>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, TransportHandle) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let sent_bytes = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inbound: Mutex::new(in_rx),
                outbound: out_tx,
                sent_bytes: sent_bytes.clone(),
            },
            TransportHandle {
                inbound: in_tx,
                outbound: out_rx,
                sent_bytes,
            },
        )
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<()> {
        self.sent_bytes.fetch_add(buf.len(), Ordering::SeqCst);
        // A dropped handle only means nobody is watching
        let _ = self.outbound.send((buf.to_vec(), addr));
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut rx = self.inbound.lock().await;
        match rx.recv().await {
            Some(item) => item,
            None => Err(EvseError::transport("Inbound channel closed")),
        }
    }
}

impl TransportHandle {
    /// Deliver a packet as if it arrived from `from`
    pub fn inject(&self, bytes: Vec<u8>, from: SocketAddr) {
        let _ = self.inbound.send(Ok((bytes, from)));
    }

    /// Make the next receive fail
    pub fn inject_error(&self, message: &str) {
        let _ = self.inbound.send(Err(EvseError::transport(message)));
    }

    /// Next packet sent by the communicator
    pub async fn next_sent(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.outbound.recv().await
    }

    /// Packet already sent, without waiting
    pub fn try_next_sent(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.outbound.try_recv().ok()
    }

    /// Total bytes handed to `send_to`
    pub fn sent_bytes(&self) -> usize {
        self.sent_bytes.load(Ordering::SeqCst)
    }
}
