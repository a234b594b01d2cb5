//! DHCPv6 reconnaissance suite
//!
//! Ping, scale, locate and enumerate scanners plus the orchestrator that
//! chains them. All probes ride inside a Relay-Forward envelope from a UDP
//! socket bound to the server port; one transport is created by the
//! outermost scanner and borrowed by every inner scan so the server keeps
//! talking to a single relay.

mod enumerate;
mod locate;
mod ping;
mod scale;

pub use enumerate::{sub_subnets, DhcpEnumerator};
pub use locate::{DhcpLocator, LocateResult};
pub use ping::{DhcpPing, DhcpPinger};
pub use scale::DhcpScaler;

use sixscan_core::config::{ScanConfig, SweepRange, Timing};
use sixscan_core::defaults;
use sixscan_core::types::{DhcpInfo, DhcpKind, SubnetScales};
use sixscan_core::{select_plen, Error, Result};
use sixscan_network::dhcpv6;
use sixscan_network::{DgramReply, DgramTransport, ReplyFilter};
use std::collections::BTreeMap;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use tracing::{debug, info};

/// UDP transport bound to `[::]:547`, as a relay would use
pub fn server_transport() -> Result<DgramTransport> {
    DgramTransport::udp(SocketAddrV6::new(
        Ipv6Addr::UNSPECIFIED,
        dhcpv6::SERVER_PORT,
        0,
        0,
    ))
}

/// Accept only server-port datagrams from the probed server.
pub(crate) fn reply_filter(target: Ipv6Addr) -> ReplyFilter<DgramReply> {
    Arc::new(move |(addr, port, _)| *addr == target && *port == dhcpv6::SERVER_PORT)
}

/// Network address of `addr`'s supernet at the given prefix length
pub(crate) fn supernet_network(addr: Ipv6Addr, plen: u8) -> Result<Ipv6Addr> {
    let network = ipnetwork::Ipv6Network::new(addr, plen)
        .map_err(|e| Error::Config(format!("prefix length {}: {}", plen, e)))?;
    Ok(network.network())
}

/// Top-level DHCPv6 scan: ping, then stateful pool location or the
/// stateless prefix sweep
pub struct DhcpScanner {
    target: Ipv6Addr,
    linkaddr: Ipv6Addr,
    count: usize,
    lossrate: f64,
    diff: u8,
    enum_limit: usize,
    sweep: SweepRange,
    timing: Timing,
}

impl DhcpScanner {
    /// The orchestrator consumes the scale, enumeration and sweep subset of
    /// the configuration.
    pub fn new(target: Ipv6Addr, linkaddr: Option<Ipv6Addr>, config: &ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            target,
            linkaddr: linkaddr.unwrap_or(target),
            count: config.count,
            lossrate: config.lossrate,
            diff: config.diff.unwrap_or(config.step),
            enum_limit: config
                .limit
                .map(|limit| limit as usize)
                .unwrap_or(defaults::DHCP_ENUM_LIMIT),
            sweep: config.sweep,
            timing: config.timing.clone(),
        })
    }

    pub fn scan(&mut self) -> Result<DhcpInfo> {
        let transport = server_transport()?;

        let ping = DhcpPinger::new(self.target, Some(self.linkaddr), self.timing.clone())
            .scan(&transport)?;
        let reply = ping
            .reply
            .ok_or_else(|| Error::NoResponse("no dhcpv6 reply".to_string()))?;
        let advertise = ping
            .advertise
            .ok_or_else(|| Error::NoResponse("no dhcpv6 advertise".to_string()))?;

        let (kind, plen, subnets) = if advertise.has_any_ia() {
            info!("{} assigns addresses, locating the served prefix", self.target);
            self.scan_stateful(&transport)?
        } else {
            info!("{} is stateless, sweeping prefix lengths", self.target);
            self.scan_stateless(&transport)?
        };

        Ok(DhcpInfo {
            target: self.target,
            linkaddr: self.linkaddr,
            plen,
            reply: reply.raw,
            advertise: advertise.raw,
            kind,
            subnets,
        })
    }

    fn scan_stateful(
        &self,
        transport: &DgramTransport,
    ) -> Result<(DhcpKind, u8, BTreeMap<Ipv6Addr, Option<SubnetScales>>)> {
        let located = DhcpLocator::new(
            self.target,
            Some(self.linkaddr),
            self.count,
            self.lossrate,
            self.timing.clone(),
        )
        .scan(transport)?;
        debug!("served prefix length {}", located.plen);

        let enumerator = DhcpEnumerator::new(
            self.target,
            Some(self.linkaddr),
            located.plen,
            self.diff.min(located.plen),
            self.timing.clone(),
        )?;
        let answers = enumerator.scan(transport)?;
        let populated: Vec<Ipv6Addr> = answers
            .into_iter()
            .filter(|(_, message)| message.as_ref().is_some_and(|m| m.has_any_ia()))
            .map(|(addr, _)| addr)
            .collect();

        let mut subnets = BTreeMap::new();
        if populated.len() > self.enum_limit {
            debug!(
                "{} populated sub-subnets exceed the limit of {}, skipping scaling",
                populated.len(),
                self.enum_limit
            );
            for addr in populated {
                subnets.insert(addr, None);
            }
        } else {
            for addr in populated {
                let scaler = DhcpScaler::new(
                    self.target,
                    Some(addr),
                    self.count,
                    self.lossrate,
                    self.timing.clone(),
                );
                let scales = scaler.scan(transport)?;
                subnets.insert(addr, Some(scales));
            }
        }
        Ok((DhcpKind::Stateful, located.plen, subnets))
    }

    fn scan_stateless(
        &self,
        transport: &DgramTransport,
    ) -> Result<(DhcpKind, u8, BTreeMap<Ipv6Addr, Option<SubnetScales>>)> {
        let mut samples: Vec<(u8, usize)> = Vec::new();
        let mut populated: BTreeMap<u8, Vec<Ipv6Addr>> = BTreeMap::new();
        for plen in self.sweep.iter() {
            if self.sweep.step > plen {
                continue;
            }
            let enumerator = DhcpEnumerator::new(
                self.target,
                Some(self.linkaddr),
                plen,
                self.sweep.step,
                self.timing.clone(),
            )?;
            let answers = enumerator.scan(transport)?;
            let answered: Vec<Ipv6Addr> = answers
                .into_iter()
                .filter(|(_, message)| message.is_some())
                .map(|(addr, _)| addr)
                .collect();
            debug!("plen {}: {} sub-subnets answered", plen, answered.len());
            samples.push((plen, answered.len()));
            populated.insert(plen, answered);
        }

        let plen = select_plen(&samples, self.sweep.step, self.lossrate)?;
        let subnets = populated
            .remove(&plen)
            .unwrap_or_default()
            .into_iter()
            .map(|addr| (addr, None))
            .collect();
        Ok((DhcpKind::Stateless, plen, subnets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supernet_network() {
        let addr: Ipv6Addr = "2001:db8:1:2:3:4:5:6".parse().unwrap();
        assert_eq!(
            supernet_network(addr, 64).unwrap(),
            "2001:db8:1:2::".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(supernet_network(addr, 0).unwrap(), Ipv6Addr::UNSPECIFIED);
        assert_eq!(supernet_network(addr, 128).unwrap(), addr);
        assert!(supernet_network(addr, 129).is_err());
    }

    #[test]
    fn test_reply_filter() {
        let target: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let filter = reply_filter(target);
        assert!(filter(&(target, 547, vec![])));
        assert!(!filter(&(target, 546, vec![])));
        assert!(!filter(&("2001:db8::2".parse().unwrap(), 547, vec![])));
    }

    #[test]
    fn test_orchestrator_config_subset() {
        let target: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let config = ScanConfig::default();
        let scanner = DhcpScanner::new(target, None, &config).unwrap();
        assert_eq!(scanner.linkaddr, target);
        assert_eq!(scanner.count, defaults::DHCP_SCALE_COUNT);
        assert_eq!(scanner.diff, config.step);
        assert_eq!(scanner.enum_limit, defaults::DHCP_ENUM_LIMIT);

        let invalid = ScanConfig {
            lossrate: 2.0,
            ..Default::default()
        };
        assert!(DhcpScanner::new(target, None, &invalid).is_err());
    }
}
