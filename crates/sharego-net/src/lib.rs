//! Native platform adapters for the ShareGo core: mDNS discovery over
//! `mdns-sd`, local-IP resolution over `if-addrs`, and a tokio TCP
//! server/client pair speaking length-prefixed frames.

pub mod mdns;
pub mod netif;
pub mod tcp;

pub use mdns::MdnsDiscovery;
pub use netif::SystemIpResolver;
pub use tcp::{TcpFrameClient, TcpFrameServer};
