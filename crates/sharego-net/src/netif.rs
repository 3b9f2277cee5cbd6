//! Local IPv4 selection.
//!
//! Picks the best RFC1918 address for this host, preferring physical
//! Wi-Fi/Ethernet interfaces over VPN and virtual adapters by interface
//! name.

use sharego_core::adapters::LocalIpResolver;
use std::net::Ipv4Addr;

/// `LocalIpResolver` backed by the OS interface table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIpResolver;

impl LocalIpResolver for SystemIpResolver {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        best_private_ipv4()
    }
}

/// Best private IPv4 of this host, or `None` when nothing usable exists.
pub fn best_private_ipv4() -> Option<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs().ok()?;
    best_from_candidates(interfaces.into_iter().filter_map(|ifa| {
        let name = ifa.name.clone();
        match ifa.ip() {
            std::net::IpAddr::V4(ip) => Some((name, ip)),
            std::net::IpAddr::V6(_) => None,
        }
    }))
}

fn best_from_candidates(candidates: impl Iterator<Item = (String, Ipv4Addr)>) -> Option<Ipv4Addr> {
    candidates
        .filter(|(_, ip)| !ip.is_loopback() && ip.is_private())
        .filter_map(|(name, ip)| interface_priority(&name).map(|prio| (prio, ip)))
        .max_by_key(|(prio, _)| *prio)
        .map(|(_, ip)| ip)
}

/// Name heuristic. `None` means the interface is virtual and skipped.
fn interface_priority(name: &str) -> Option<i32> {
    const VIRTUAL: [&str; 12] = [
        "utun", "tun", "tap", "ipsec", "ppp", "wg", "vmnet", "veth", "docker", "br-", "virbr",
        "vbox",
    ];
    if name == "lo" || name == "lo0" {
        return None;
    }
    if VIRTUAL.iter().any(|prefix| name.starts_with(prefix)) {
        return None;
    }

    if name.starts_with("wlan") {
        return Some(100);
    }
    if name.starts_with("wlp") {
        return Some(95);
    }
    if name == "en0" {
        return Some(90);
    }
    if name.starts_with("enp") {
        return Some(65);
    }
    if name.len() > 2 && name.starts_with("en") && name[2..].bytes().all(|b| b.is_ascii_digit()) {
        return Some(80);
    }
    if name.starts_with("eth") {
        return Some(70);
    }
    // Windows friendly names.
    if name.contains("Wi-Fi") {
        return Some(100);
    }
    if name.contains("Ethernet") {
        return Some(70);
    }
    Some(0)
}
