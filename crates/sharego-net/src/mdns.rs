//! mDNS discovery adapter over `mdns-sd`.
//!
//! Registration keeps the daemon alive for as long as the adapter exists.
//! Browsing runs the daemon's blocking receiver on a blocking task and
//! forwards resolved services into an async channel; `stop_browsing`
//! disconnects the daemon receiver, which ends that task.

use crate::netif::best_private_ipv4;
use anyhow::Result;
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use sharego_core::adapters::{DiscoveredService, DiscoveryAdapter};
use sharego_core::error::TransportError;
use sharego_core::types::NetworkAddress;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    instance_name: String,
    registered: Mutex<Option<String>>,
    browsing: Mutex<Option<String>>,
}

impl MdnsDiscovery {
    pub fn new(instance_name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            instance_name: instance_name.into(),
            registered: Mutex::new(None),
            browsing: Mutex::new(None),
        })
    }
}

#[async_trait]
impl DiscoveryAdapter for MdnsDiscovery {
    async fn advertise(
        &self,
        service_type: &str,
        port: u16,
        txt: &[(String, String)],
    ) -> Result<(), TransportError> {
        let service_type = ensure_dot(service_type);
        let ip = best_private_ipv4()
            .ok_or_else(|| TransportError::Adapter("no usable local IPv4".to_string()))?;
        let host_name = ensure_dot(&format!("{}.local", self.instance_name));

        let info = ServiceInfo::new(
            &service_type,
            &self.instance_name,
            &host_name,
            &ip.to_string(),
            port,
            txt,
        )
        .map_err(|err| TransportError::Adapter(err.to_string()))?;

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|err| TransportError::Adapter(err.to_string()))?;
        tracing::info!("advertising {} on {}:{}", fullname, ip, port);
        *self.registered.lock().expect("mdns register lock") = Some(fullname);
        Ok(())
    }

    async fn browse(
        &self,
        service_type: &str,
    ) -> Result<mpsc::UnboundedReceiver<DiscoveredService>, TransportError> {
        let service_type = ensure_dot(service_type);
        let receiver = self
            .daemon
            .browse(&service_type)
            .map_err(|err| TransportError::Adapter(err.to_string()))?;
        *self.browsing.lock().expect("mdns browse lock") = Some(service_type);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = receiver.recv() {
                if let ServiceEvent::ServiceResolved(info) = event {
                    let Some(service) = map_service(&info) else { continue };
                    if tx.send(service).is_err() {
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn stop_advertising(&self) {
        if let Some(fullname) = self.registered.lock().expect("mdns register lock").take() {
            if let Err(err) = self.daemon.unregister(&fullname) {
                tracing::debug!("unregister {fullname} failed: {err}");
            }
        }
    }

    async fn stop_browsing(&self) {
        if let Some(service_type) = self.browsing.lock().expect("mdns browse lock").take() {
            if let Err(err) = self.daemon.stop_browse(&service_type) {
                tracing::debug!("stop_browse {service_type} failed: {err}");
            }
        }
    }
}

fn map_service(info: &ServiceInfo) -> Option<DiscoveredService> {
    let ip = info.get_addresses().iter().find_map(|addr| match addr {
        IpAddr::V4(v4) => Some(*v4),
        IpAddr::V6(_) => None,
    })?;

    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    Some(DiscoveredService {
        name: info.get_fullname().to_string(),
        address: NetworkAddress::new(ip, info.get_port()),
        txt,
    })
}

/// mdns-sd expects trailing-dot FQDNs.
fn ensure_dot(s: &str) -> String {
    if s.ends_with('.') {
        s.to_string()
    } else {
        format!("{}.", s)
    }
}
