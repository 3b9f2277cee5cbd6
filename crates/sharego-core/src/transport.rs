//! Single-peer transport over a pluggable server or client adapter.
//!
//! Exactly one peer connection is live at a time; the adapter drops any
//! extras. Inbound frames are forwarded in arrival order on one event
//! channel. A peer that connects to a listening transport and closes again
//! without sending a byte is treated as a discovery probe: the transport
//! returns to `Listening` instead of reporting a disconnect.

use crate::adapters::{PeerCommand, PeerEvent, PeerLink, WsClientAdapter, WsServerAdapter};
use crate::config::{MAX_MESSAGE_SIZE, WS_CONNECT_TIMEOUT};
use crate::error::TransportError;
use crate::types::NetworkAddress;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Listening,
    Connected,
    Disconnected,
    Closed,
}

#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    Frame(Vec<u8>),
    Disconnected,
}

struct Shared {
    state: Mutex<TransportState>,
    peer: Mutex<Option<mpsc::UnboundedSender<PeerCommand>>>,
    local_addr: Mutex<Option<NetworkAddress>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Shared {
    fn set_state(&self, next: TransportState) {
        *self.state.lock().expect("transport state lock") = next;
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }
}

pub struct Transport {
    shared: Arc<Shared>,
    server: Mutex<Option<Box<dyn WsServerAdapter>>>,
    client: Mutex<Option<Box<dyn WsClientAdapter>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl Transport {
    fn new(
        server: Option<Box<dyn WsServerAdapter>>,
        client: Option<Box<dyn WsClientAdapter>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TransportState::Idle),
                peer: Mutex::new(None),
                local_addr: Mutex::new(None),
                events_tx,
                shutdown_tx,
                closed: AtomicBool::new(false),
            }),
            server: Mutex::new(server),
            client: Mutex::new(client),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Receiver-side transport over a listening adapter.
    pub fn with_server(adapter: Box<dyn WsServerAdapter>) -> Self {
        Self::new(Some(adapter), None)
    }

    /// Sender-side transport over a dialing adapter.
    pub fn with_client(adapter: Box<dyn WsClientAdapter>) -> Self {
        Self::new(None, Some(adapter))
    }

    pub fn state(&self) -> TransportState {
        *self.shared.state.lock().expect("transport state lock")
    }

    pub fn local_address(&self) -> Option<NetworkAddress> {
        *self.shared.local_addr.lock().expect("transport addr lock")
    }

    /// Take the event stream. Called once by the owning session.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().expect("transport events lock").take()
    }

    /// Bind the server adapter and start accepting. Returns the bound
    /// address for the QR payload.
    pub async fn listen(&self, port: u16) -> Result<NetworkAddress, TransportError> {
        let mut server = self
            .server
            .lock()
            .expect("transport server lock")
            .take()
            .ok_or(TransportError::NotBound)?;

        if self.state() != TransportState::Idle {
            return Err(TransportError::PeerAlreadyConnected);
        }

        let addr = server.start(port).await?;
        *self.shared.local_addr.lock().expect("transport addr lock") = Some(addr);
        self.shared.set_state(TransportState::Listening);
        tracing::debug!("transport listening on {}", addr);

        let shared = self.shared.clone();
        tokio::spawn(accept_loop(shared, server));
        Ok(addr)
    }

    /// Dial a receiver. Accepts `ipv4:port` or `ws://ipv4:port`.
    pub async fn connect(&self, addr: &str) -> Result<(), TransportError> {
        let client = self
            .client
            .lock()
            .expect("transport client lock")
            .take()
            .ok_or(TransportError::NotBound)?;

        if self.state() != TransportState::Idle {
            return Err(TransportError::PeerAlreadyConnected);
        }

        let target: NetworkAddress = addr.parse()?;
        let link = match tokio::time::timeout(WS_CONNECT_TIMEOUT, client.connect(&target)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::ConnectionTimedOut),
        };
        tracing::debug!("transport connected to {}", target);

        let shared = self.shared.clone();
        attach_peer(&shared, &link);
        tokio::spawn(async move {
            let outcome = pump_peer(&shared, link.inbound).await;
            detach_peer(&shared);
            if !shared.closed.load(Ordering::SeqCst) && outcome != PumpOutcome::Shutdown {
                shared.set_state(TransportState::Disconnected);
                shared.emit(TransportEvent::Disconnected);
            }
        });
        Ok(())
    }

    /// Queue one frame to the connected peer. Synchronous; delivery is
    /// handled by the adapter's writer task.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if frame.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: frame.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }
        let peer = self.shared.peer.lock().expect("transport peer lock");
        let tx = peer.as_ref().ok_or(TransportError::NotBound)?;
        tx.send(PeerCommand::Frame(frame)).map_err(|_| TransportError::Closed)
    }

    /// Close the transport. Terminal and idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shared.peer.lock().expect("transport peer lock").take() {
            let _ = tx.send(PeerCommand::Close);
        }
        self.shared.set_state(TransportState::Closed);
        self.shared.shutdown_tx.send_replace(true);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn attach_peer(shared: &Shared, link: &PeerLink) {
    *shared.peer.lock().expect("transport peer lock") = Some(link.outbound.clone());
    shared.set_state(TransportState::Connected);
    shared.emit(TransportEvent::Connected);
}

fn detach_peer(shared: &Shared) {
    shared.peer.lock().expect("transport peer lock").take();
}

#[derive(Debug, PartialEq, Eq)]
enum PumpOutcome {
    /// Peer closed after exchanging at least one frame.
    PeerGone,
    /// Peer closed without ever sending a byte.
    SilentPeer,
    /// The transport itself shut down.
    Shutdown,
}

/// Forward one peer's inbound frames to the event channel.
async fn pump_peer(
    shared: &Shared,
    mut inbound: mpsc::UnboundedReceiver<PeerEvent>,
) -> PumpOutcome {
    // A subscriber created after the shutdown signal would miss it.
    if shared.closed.load(Ordering::SeqCst) {
        return PumpOutcome::Shutdown;
    }
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let mut got_frame = false;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return PumpOutcome::Shutdown,
            event = inbound.recv() => match event {
                Some(PeerEvent::Frame(frame)) => {
                    if frame.len() > MAX_MESSAGE_SIZE {
                        tracing::warn!("dropping oversized inbound frame ({} bytes)", frame.len());
                        continue;
                    }
                    got_frame = true;
                    shared.emit(TransportEvent::Frame(frame));
                }
                Some(PeerEvent::Closed) | None => {
                    return if got_frame { PumpOutcome::PeerGone } else { PumpOutcome::SilentPeer };
                }
            },
        }
    }
}

/// Accept peers until shutdown. One peer at a time; silent peers (subnet
/// probes) put the transport back into `Listening`.
async fn accept_loop(shared: Arc<Shared>, mut server: Box<dyn WsServerAdapter>) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        let link = tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = server.accept() => match accepted {
                Some(link) => link,
                None => break,
            },
        };

        attach_peer(&shared, &link);
        let outcome = pump_peer(&shared, link.inbound).await;
        detach_peer(&shared);

        match outcome {
            PumpOutcome::Shutdown => break,
            PumpOutcome::SilentPeer => {
                tracing::debug!("silent peer dropped; back to listening");
                shared.set_state(TransportState::Listening);
            }
            PumpOutcome::PeerGone => {
                shared.set_state(TransportState::Disconnected);
                shared.emit(TransportEvent::Disconnected);
                break;
            }
        }
    }
    server.stop().await;
}
