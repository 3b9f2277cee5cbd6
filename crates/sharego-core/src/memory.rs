//! In-memory adapter pair.
//!
//! `memory_pair` returns a cross-linked server/client duo backed by
//! channels. The client connects to its paired server regardless of the
//! address it is given; address validation still happens in the transport.
//! Used by the integration tests and useful for embedding the core in a
//! simulator.

use crate::adapters::{PeerCommand, PeerEvent, PeerLink, WsClientAdapter, WsServerAdapter};
use crate::error::TransportError;
use crate::types::NetworkAddress;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Build a linked server/client adapter pair.
pub fn memory_pair() -> (MemoryServer, MemoryClient) {
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();
    let active = Arc::new(AtomicUsize::new(0));
    (
        MemoryServer { conn_rx, active: active.clone(), started: false },
        MemoryClient { conn_tx, active },
    )
}

pub struct MemoryServer {
    conn_rx: mpsc::UnboundedReceiver<PeerLink>,
    active: Arc<AtomicUsize>,
    started: bool,
}

pub struct MemoryClient {
    conn_tx: mpsc::UnboundedSender<PeerLink>,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl WsServerAdapter for MemoryServer {
    async fn start(&mut self, port: u16) -> Result<NetworkAddress, TransportError> {
        self.started = true;
        Ok(NetworkAddress::new(Ipv4Addr::LOCALHOST, port))
    }

    async fn accept(&mut self) -> Option<PeerLink> {
        if !self.started {
            return None;
        }
        self.conn_rx.recv().await
    }

    async fn stop(&mut self) {
        self.started = false;
        self.conn_rx.close();
    }
}

#[async_trait]
impl WsClientAdapter for MemoryClient {
    async fn connect(&self, _addr: &NetworkAddress) -> Result<PeerLink, TransportError> {
        // Single-peer rule: while one connection is live, extras are
        // accepted and immediately dropped, like a real server adapter.
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.active.fetch_sub(1, Ordering::SeqCst);
            let (client_link, ends) = PeerLink::channel();
            let _ = ends.events.send(PeerEvent::Closed);
            return Ok(client_link);
        }

        let (client_link, client_ends) = PeerLink::channel();
        let (server_link, server_ends) = PeerLink::channel();

        let guard = Arc::new(ActiveGuard(self.active.clone()));
        tokio::spawn(forward(client_ends.commands, server_ends.events.clone(), guard.clone()));
        tokio::spawn(forward(server_ends.commands, client_ends.events.clone(), guard));

        self.conn_tx.send(server_link).map_err(|_| TransportError::Closed)?;
        Ok(client_link)
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shuttle frames from one side's command queue to the other side's event
/// queue until either end goes away.
async fn forward(
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    events: mpsc::UnboundedSender<PeerEvent>,
    _guard: Arc<ActiveGuard>,
) {
    loop {
        match commands.recv().await {
            Some(PeerCommand::Frame(frame)) => {
                if events.send(PeerEvent::Frame(frame)).is_err() {
                    break;
                }
            }
            Some(PeerCommand::Close) | None => {
                let _ = events.send(PeerEvent::Closed);
                break;
            }
        }
    }
}

/// A raw wire endpoint for tests that need to speak the protocol directly
/// against a listening transport, without a full client-side session.
pub struct RawPeer {
    link: Mutex<PeerLink>,
}

impl RawPeer {
    /// Connect through a memory client and keep the raw link.
    pub async fn connect(client: &MemoryClient) -> Result<Self, TransportError> {
        let link =
            client.connect(&NetworkAddress::new(Ipv4Addr::LOCALHOST, 1)).await?;
        Ok(Self { link: Mutex::new(link) })
    }

    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.link
            .lock()
            .await
            .outbound
            .send(PeerCommand::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    /// Next inbound frame, or `None` once the peer side closed.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        loop {
            match self.link.lock().await.inbound.recv().await {
                Some(PeerEvent::Frame(frame)) => return Some(frame),
                Some(PeerEvent::Closed) | None => return None,
            }
        }
    }

    pub async fn close(&self) {
        let _ = self.link.lock().await.outbound.send(PeerCommand::Close);
    }
}
