//! Receiver discovery: mDNS browse first, /24 subnet probe as fallback.
//!
//! The subnet probe opens up to 254 connections through the client adapter,
//! capped by a semaphore; the first host that accepts wins and the rest are
//! cancelled greedily. All waiting honors the caller's cancellation token.

use crate::adapters::{DiscoveryAdapter, LocalIpResolver, PeerCommand, WsClientAdapter};
use crate::config::{
    DISCOVERY_HOST_TIMEOUT, MDNS_BROWSE_TIMEOUT, PROTOCOL_VERSION, SERVICE_TYPE,
    SUBNET_SCAN_CONCURRENCY,
};
use crate::error::TransportError;
use crate::types::{Base64PublicKey, NetworkAddress, SessionId};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;

/// Cooperative cancellation flag shared between a discovery call and its
/// caller.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

/// A receiver found on the LAN.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredReceiver {
    pub address: NetworkAddress,
    pub session_id: SessionId,
    pub public_key: Option<Base64PublicKey>,
}

/// What to look for and how long to try.
#[derive(Clone)]
pub struct DiscoverOptions {
    pub session_id: SessionId,
    pub port: u16,
    pub browse_timeout: Duration,
    pub cancel: CancelToken,
}

impl DiscoverOptions {
    pub fn new(session_id: SessionId, port: u16) -> Self {
        Self {
            session_id,
            port,
            browse_timeout: MDNS_BROWSE_TIMEOUT,
            cancel: CancelToken::new(),
        }
    }
}

/// Publish a receiver's bootstrap data over mDNS.
pub async fn advertise_receiver(
    adapter: &dyn DiscoveryAdapter,
    port: u16,
    session_id: &SessionId,
    public_key: &Base64PublicKey,
) -> Result<(), TransportError> {
    let txt = vec![
        ("sid".to_string(), session_id.to_string()),
        ("pk".to_string(), public_key.to_string()),
        ("v".to_string(), PROTOCOL_VERSION.to_string()),
    ];
    adapter.advertise(SERVICE_TYPE, port, &txt).await
}

/// Find the receiver advertising the requested session code. Returns `None`
/// on timeout or cancellation.
pub async fn discover_receiver(
    adapter: Option<&dyn DiscoveryAdapter>,
    probe_client: Arc<dyn WsClientAdapter>,
    resolver: &dyn LocalIpResolver,
    opts: &DiscoverOptions,
) -> Option<DiscoveredReceiver> {
    if let Some(adapter) = adapter {
        match browse_for_sid(adapter, opts).await {
            Some(found) => return Some(found),
            None if opts.cancel.is_cancelled() => return None,
            None => tracing::debug!("mDNS found nothing; falling back to subnet probe"),
        }
    }
    probe_subnet(probe_client, resolver, opts).await
}

async fn browse_for_sid(
    adapter: &dyn DiscoveryAdapter,
    opts: &DiscoverOptions,
) -> Option<DiscoveredReceiver> {
    let mut services = match adapter.browse(SERVICE_TYPE).await {
        Ok(rx) => rx,
        Err(err) => {
            tracing::warn!("mDNS browse failed: {err}");
            return None;
        }
    };

    let deadline = tokio::time::sleep(opts.browse_timeout);
    tokio::pin!(deadline);

    let found = loop {
        tokio::select! {
            _ = opts.cancel.cancelled() => break None,
            _ = &mut deadline => break None,
            service = services.recv() => match service {
                None => break None,
                Some(service) => {
                    let sid_matches = service
                        .txt
                        .get("sid")
                        .is_some_and(|sid| sid == opts.session_id.as_str());
                    if sid_matches {
                        tracing::info!("found receiver {} via mDNS", service.address);
                        break Some(DiscoveredReceiver {
                            address: service.address,
                            session_id: opts.session_id.clone(),
                            public_key: service
                                .txt
                                .get("pk")
                                .map(|pk| Base64PublicKey::from_encoded(pk.as_str())),
                        });
                    }
                }
            },
        }
    };

    adapter.stop_browsing().await;
    found
}

/// Probe every host of the local /24 on the target port; first successful
/// open wins.
async fn probe_subnet(
    client: Arc<dyn WsClientAdapter>,
    resolver: &dyn LocalIpResolver,
    opts: &DiscoverOptions,
) -> Option<DiscoveredReceiver> {
    let local_ip = resolver.local_ipv4()?;
    let octets = local_ip.octets();
    tracing::debug!("probing {}.{}.{}.0/24 on port {}", octets[0], octets[1], octets[2], opts.port);

    let semaphore = Arc::new(Semaphore::new(SUBNET_SCAN_CONCURRENCY));
    let mut probes: JoinSet<Option<NetworkAddress>> = JoinSet::new();

    for host in 1..=254u8 {
        let target =
            NetworkAddress::new(Ipv4Addr::new(octets[0], octets[1], octets[2], host), opts.port);
        let client = client.clone();
        let semaphore = semaphore.clone();
        let cancel = opts.cancel.clone();
        probes.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else { return None };
            if cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = cancel.cancelled() => None,
                hit = probe_host(client, target) => hit,
            }
        });
    }

    let mut found = None;
    while let Some(joined) = tokio::select! {
        _ = opts.cancel.cancelled() => None,
        next = probes.join_next() => next,
    } {
        if let Ok(Some(address)) = joined {
            found = Some(address);
            break;
        }
    }
    probes.abort_all();
    semaphore.close();

    let address = found?;
    Some(DiscoveredReceiver {
        address,
        session_id: opts.session_id.clone(),
        public_key: None,
    })
}

/// One open-then-close probe with a per-host deadline.
async fn probe_host(
    client: Arc<dyn WsClientAdapter>,
    target: NetworkAddress,
) -> Option<NetworkAddress> {
    match tokio::time::timeout(DISCOVERY_HOST_TIMEOUT, client.connect(&target)).await {
        Ok(Ok(link)) => {
            let _ = link.outbound.send(PeerCommand::Close);
            Some(target)
        }
        _ => None,
    }
}
