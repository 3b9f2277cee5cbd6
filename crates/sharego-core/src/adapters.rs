//! Capability seams for platform services.
//!
//! The core never opens sockets or touches mDNS itself; it is handed small
//! adapter objects at construction time. A connected peer is represented by
//! a pair of channels so the core side stays free of adapter-specific IO:
//! the adapter owns the reader/writer tasks and forwards whole frames.

use crate::error::TransportError;
use crate::types::NetworkAddress;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::mpsc;

/// Outbound instruction to the adapter's writer side.
#[derive(Debug)]
pub enum PeerCommand {
    Frame(Vec<u8>),
    Close,
}

/// Inbound notification from the adapter's reader side.
#[derive(Debug)]
pub enum PeerEvent {
    Frame(Vec<u8>),
    Closed,
}

/// One connected peer, as seen by the transport.
#[derive(Debug)]
pub struct PeerLink {
    pub outbound: mpsc::UnboundedSender<PeerCommand>,
    pub inbound: mpsc::UnboundedReceiver<PeerEvent>,
}

impl PeerLink {
    /// Create the core-facing link plus the adapter-facing ends.
    pub fn channel() -> (PeerLink, PeerAdapterEnds) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            PeerLink { outbound: out_tx, inbound: in_rx },
            PeerAdapterEnds { commands: out_rx, events: in_tx },
        )
    }
}

/// The halves an adapter keeps for its IO tasks.
#[derive(Debug)]
pub struct PeerAdapterEnds {
    pub commands: mpsc::UnboundedReceiver<PeerCommand>,
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

/// Listening side of the socket seam.
///
/// Implementations bind `0.0.0.0:port`, enforce at most one concurrent peer
/// (extra incoming connections are closed immediately), cap inbound frames
/// at 64 KiB, and retry the bind a few times to ride out lingering sockets
/// after a quick restart.
#[async_trait]
pub trait WsServerAdapter: Send {
    /// Bind and return the externally reachable `ip:port`.
    async fn start(&mut self, port: u16) -> Result<NetworkAddress, TransportError>;

    /// Wait for the next accepted peer. `None` once the server is stopped.
    async fn accept(&mut self) -> Option<PeerLink>;

    async fn stop(&mut self);
}

/// Dialing side of the socket seam. `connect` observes the configured
/// connect timeout and fails with `ConnectionTimedOut`.
#[async_trait]
pub trait WsClientAdapter: Send + Sync {
    async fn connect(&self, addr: &NetworkAddress) -> Result<PeerLink, TransportError>;
}

/// One service seen while browsing.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub name: String,
    pub address: NetworkAddress,
    pub txt: HashMap<String, String>,
}

/// mDNS advertise/browse seam.
#[async_trait]
pub trait DiscoveryAdapter: Send + Sync {
    async fn advertise(
        &self,
        service_type: &str,
        port: u16,
        txt: &[(String, String)],
    ) -> Result<(), TransportError>;

    /// Start browsing; resolved services arrive on the returned channel
    /// until `stop_browsing` is called or the adapter is dropped.
    async fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::UnboundedReceiver<DiscoveredService>, TransportError>;

    async fn stop_advertising(&self);

    async fn stop_browsing(&self);
}

/// Best private IPv4 for this host, physical interfaces preferred.
pub trait LocalIpResolver: Send + Sync {
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}
