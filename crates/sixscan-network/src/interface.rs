//! Capture interface and source-address discovery

use pnet_datalink::NetworkInterface;
use sixscan_core::{Error, Result};
use std::net::{IpAddr, Ipv6Addr};

fn interfaces() -> Vec<NetworkInterface> {
    pnet_datalink::interfaces()
}

fn has_global_v6(iface: &NetworkInterface) -> bool {
    iface.ips.iter().any(|ip| match ip.ip() {
        IpAddr::V6(v6) => !v6.is_loopback() && (v6.segments()[0] & 0xffc0) != 0xfe80,
        IpAddr::V4(_) => false,
    })
}

/// First up, non-loopback interface carrying a non-link-local IPv6 address.
pub fn default_interface() -> Result<String> {
    interfaces()
        .into_iter()
        .find(|i| !i.is_loopback() && i.is_up() && has_global_v6(i))
        .map(|i| i.name)
        .ok_or_else(|| Error::Network("no IPv6-capable interface found".to_string()))
}

/// Source address used when crafting packets sent out of `name`.
///
/// Prefers a non-link-local address and falls back to link-local.
pub fn source_addr(name: &str) -> Result<Ipv6Addr> {
    let iface = interfaces()
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| Error::Network(format!("interface not found: {}", name)))?;
    let v6s: Vec<Ipv6Addr> = iface
        .ips
        .iter()
        .filter_map(|ip| match ip.ip() {
            IpAddr::V6(v6) if !v6.is_loopback() => Some(v6),
            _ => None,
        })
        .collect();
    v6s.iter()
        .find(|a| (a.segments()[0] & 0xffc0) != 0xfe80)
        .or_else(|| v6s.first())
        .copied()
        .ok_or_else(|| Error::Network(format!("no IPv6 address on {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interfaces_enumerate() {
        // Every test environment has at least a loopback interface.
        assert!(!interfaces().is_empty());
    }

    #[test]
    fn test_unknown_interface() {
        assert!(source_addr("does-not-exist0").is_err());
    }
}
