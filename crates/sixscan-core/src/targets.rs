//! Target and port expansion
//!
//! Each target string is tried in order as CIDR `host/prefix`, range
//! `host1-host2`, then single host. Host components resolve over AAAA with a
//! random pick among the returned records. Expanded sets are deduplicated
//! and capped at [`defaults::MAX_TARGETS`] unless the check is disabled.

use crate::defaults;
use crate::error::{Error, Result};
use ipnetwork::Ipv6Network;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv6Addr};

/// Resolve a host component to a single IPv6 address.
///
/// Literal addresses pass through; names go through an AAAA lookup with a
/// random choice among the answers.
pub fn resolve_host(host: &str) -> Result<Ipv6Addr> {
    if let Ok(addr) = host.parse::<Ipv6Addr>() {
        return Ok(addr);
    }
    let addrs: Vec<Ipv6Addr> = dns_lookup::lookup_host(host)
        .map_err(|e| Error::InvalidTarget(format!("cannot resolve {}: {}", host, e)))?
        .into_iter()
        .filter_map(|ip| match ip {
            IpAddr::V6(v6) => Some(v6),
            IpAddr::V4(_) => None,
        })
        .collect();
    addrs
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| Error::InvalidTarget(format!("no AAAA records for {}", host)))
}

struct AddrSet {
    addrs: BTreeSet<Ipv6Addr>,
    unlimited: bool,
}

impl AddrSet {
    fn insert(&mut self, addr: Ipv6Addr) -> Result<()> {
        self.addrs.insert(addr);
        if !self.unlimited && self.addrs.len() > defaults::MAX_TARGETS {
            return Err(Error::InvalidTarget(format!(
                "more than {} targets",
                defaults::MAX_TARGETS
            )));
        }
        Ok(())
    }

    fn add_cidr(&mut self, spec: &str) -> Result<bool> {
        let Some((host, prefix)) = spec.rsplit_once('/') else {
            return Ok(false);
        };
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| Error::InvalidTarget(format!("invalid prefix length: {}", spec)))?;
        let addr = resolve_host(host)?;
        let network = Ipv6Network::new(addr, prefix)?;
        // Refuse early rather than iterating an astronomically large block.
        if !self.unlimited && prefix < 112 {
            return Err(Error::InvalidTarget(format!(
                "{} expands past {} targets",
                spec,
                defaults::MAX_TARGETS
            )));
        }
        let base = u128::from(network.network());
        let size = 1u128
            .checked_shl(128 - prefix as u32)
            .unwrap_or(u128::MAX);
        for i in 0..size {
            self.insert(Ipv6Addr::from(base + i))?;
        }
        Ok(true)
    }

    fn add_range(&mut self, spec: &str) -> Result<bool> {
        let Some((lo, hi)) = spec.split_once('-') else {
            return Ok(false);
        };
        let a1 = u128::from(resolve_host(lo)?);
        let a2 = u128::from(resolve_host(hi)?);
        if a1 >= a2 {
            return Err(Error::InvalidTarget(format!("invalid range: {}", spec)));
        }
        if !self.unlimited && (a2 - a1) > defaults::MAX_TARGETS as u128 {
            return Err(Error::InvalidTarget(format!(
                "{} expands past {} targets",
                spec,
                defaults::MAX_TARGETS
            )));
        }
        // Inclusive of the start, exclusive of the end.
        for a in a1..a2 {
            self.insert(Ipv6Addr::from(a))?;
        }
        Ok(true)
    }
}

/// Expand target strings into a deduplicated, canonically ordered address list.
pub fn expand_addrs(specs: &[String], unlimited: bool) -> Result<Vec<Ipv6Addr>> {
    let mut set = AddrSet {
        addrs: BTreeSet::new(),
        unlimited,
    };
    for spec in specs {
        if set.add_cidr(spec)? || set.add_range(spec)? {
            continue;
        }
        let addr = resolve_host(spec)?;
        set.insert(addr)?;
    }
    Ok(set.addrs.into_iter().collect())
}

/// Expand port strings (`N` or `N-M`, upper bound exclusive) into a sorted set.
pub fn expand_ports(specs: &[String]) -> Result<Vec<u16>> {
    let mut ports: BTreeSet<u16> = BTreeSet::new();
    for spec in specs {
        if let Some((lo, hi)) = spec.split_once('-') {
            let p1: u32 = lo
                .parse()
                .map_err(|_| Error::InvalidPortRange(spec.clone()))?;
            let p2: u32 = hi
                .parse()
                .map_err(|_| Error::InvalidPortRange(spec.clone()))?;
            if !(0 < p1 && p1 < p2 && p2 <= 65536) {
                return Err(Error::InvalidPortRange(spec.clone()));
            }
            for p in p1..p2 {
                ports.insert(p as u16);
            }
        } else {
            let p: u32 = spec
                .parse()
                .map_err(|_| Error::InvalidPortRange(spec.clone()))?;
            if !(0 < p && p <= 65535) {
                return Err(Error::InvalidPortRange(spec.clone()));
            }
            ports.insert(p as u16);
        }
    }
    Ok(ports.into_iter().collect())
}

/// Expand targets and ports into their cross product, capped at
/// [`defaults::MAX_TARGETS`].
pub fn expand_addr_ports(
    addr_specs: &[String],
    port_specs: &[String],
    unlimited: bool,
) -> Result<Vec<(Ipv6Addr, u16)>> {
    let addrs = expand_addrs(addr_specs, unlimited)?;
    let ports = expand_ports(port_specs)?;
    if !unlimited && addrs.len() * ports.len() > defaults::MAX_TARGETS {
        return Err(Error::InvalidTarget(format!(
            "{} address-port tuples exceed {}",
            addrs.len() * ports.len(),
            defaults::MAX_TARGETS
        )));
    }
    Ok(addrs
        .iter()
        .flat_map(|addr| ports.iter().map(move |port| (*addr, *port)))
        .collect())
}
