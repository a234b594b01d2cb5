//! Sub-subnet enumeration
//!
//! Computes the supernet of the link address at `plen - diff` and sends one
//! Solicit per `diff`-sized sub-subnet, the sub-subnet index as transaction
//! id and its network address as the relay link address. One
//! timewait-delimited batch; each sub-subnet is recorded with the Advertise
//! that answered it, if any.

use crate::dhcp::{reply_filter, supernet_network};
use crate::engine::{self, Drive, ScanDriver};
use sixscan_core::config::Timing;
use sixscan_core::{Error, Result};
use sixscan_network::dhcpv6::{self, DhcpMessage, Duid};
use sixscan_network::{DgramProbe, DgramReply, DgramTransport, ReplyFilter};
use std::net::Ipv6Addr;
use tracing::debug;

pub struct DhcpEnumerator {
    target: Ipv6Addr,
    subnets: Vec<Ipv6Addr>,
    duid: Duid,
    timing: Timing,
}

struct EnumDriver<'a> {
    enumerator: &'a DhcpEnumerator,
    sent: bool,
}

impl ScanDriver for EnumDriver<'_> {
    type Probe = DgramProbe;
    type Reply = DgramReply;

    fn drive(&self) -> Drive {
        Drive::OnceWait
    }

    fn batch(&mut self, _results: &mut Vec<DgramReply>) -> Result<Option<Vec<DgramProbe>>> {
        if self.sent {
            return Ok(None);
        }
        self.sent = true;
        let enumerator = self.enumerator;
        let probes = enumerator
            .subnets
            .iter()
            .enumerate()
            .map(|(trid, subnet)| {
                let solicit = dhcpv6::build_solicit(&enumerator.duid, trid as u32);
                let relay = dhcpv6::wrap_relay_forward(*subnet, &solicit);
                DgramProbe::new(enumerator.target, dhcpv6::SERVER_PORT, relay)
            })
            .collect();
        Ok(Some(probes))
    }

    fn filter(&self) -> ReplyFilter<DgramReply> {
        reply_filter(self.enumerator.target)
    }
}

/// Network addresses of the `2^diff` sub-subnets of the `plen - diff`
/// supernet around `linkaddr`.
pub fn sub_subnets(linkaddr: Ipv6Addr, plen: u8, diff: u8) -> Result<Vec<Ipv6Addr>> {
    if diff == 0 || diff > plen || plen > 128 {
        return Err(Error::Config(format!(
            "invalid enumeration range: plen {} diff {}",
            plen, diff
        )));
    }
    if diff > 16 {
        return Err(Error::Config(format!(
            "enumeration of 2^{} sub-subnets refused",
            diff
        )));
    }
    let base = u128::from(supernet_network(linkaddr, plen - diff)?);
    let step = if plen == 128 { 1 } else { 1u128 << (128 - plen) };
    Ok((0..1u128 << diff)
        .map(|i| Ipv6Addr::from(base + i * step))
        .collect())
}

fn parse_answers(
    subnets: &[Ipv6Addr],
    replies: &[DgramReply],
) -> Vec<(Ipv6Addr, Option<DhcpMessage>)> {
    let mut results: Vec<(Ipv6Addr, Option<DhcpMessage>)> =
        subnets.iter().map(|subnet| (*subnet, None)).collect();
    for (_, _, buf) in replies {
        let message = match dhcpv6::parse_relay_reply(buf) {
            Ok(message) => message,
            Err(e) => {
                debug!("discarding dhcpv6 response: {}", e);
                continue;
            }
        };
        if !message.is_advertise() {
            continue;
        }
        match results.get_mut(message.trid as usize) {
            Some(slot) => slot.1 = Some(message),
            None => debug!("advertise trid {} matches no sub-subnet", message.trid),
        }
    }
    results
}

impl DhcpEnumerator {
    pub fn new(
        target: Ipv6Addr,
        linkaddr: Option<Ipv6Addr>,
        plen: u8,
        diff: u8,
        timing: Timing,
    ) -> Result<Self> {
        let linkaddr = linkaddr.unwrap_or(target);
        Ok(Self {
            target,
            subnets: sub_subnets(linkaddr, plen, diff)?,
            duid: Duid::random_link_layer(),
            timing,
        })
    }

    pub fn subnets(&self) -> &[Ipv6Addr] {
        &self.subnets
    }

    /// Enumerate over a borrowed server transport.
    pub fn scan(&self, transport: &DgramTransport) -> Result<Vec<(Ipv6Addr, Option<DhcpMessage>)>> {
        let mut driver = EnumDriver {
            enumerator: self,
            sent: false,
        };
        let replies = engine::run(transport, &mut driver, &self.timing)?;
        Ok(parse_answers(&self.subnets, &replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sixscan_network::dhcpv6::{MSG_ADVERTISE, MSG_RELAY_REPLY, OPT_RELAY_MSG};

    fn target() -> Ipv6Addr {
        "2001:db8::1".parse().unwrap()
    }

    fn advertise(trid: u32) -> Vec<u8> {
        let mut inner = vec![MSG_ADVERTISE];
        inner.extend_from_slice(&trid.to_be_bytes()[1..]);
        let mut buf = vec![MSG_RELAY_REPLY, 0];
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&OPT_RELAY_MSG.to_be_bytes());
        buf.extend_from_slice(&(inner.len() as u16).to_be_bytes());
        buf.extend_from_slice(&inner);
        buf
    }

    #[test]
    fn test_sub_subnet_walk() {
        let subnets = sub_subnets("2001:db8::1234".parse().unwrap(), 120, 4).unwrap();
        assert_eq!(subnets.len(), 16);
        // /116 supernet of ...::1234 starts at ::1000, stepping /120 blocks.
        assert_eq!(subnets[0], "2001:db8::1000".parse::<Ipv6Addr>().unwrap());
        assert_eq!(subnets[1], "2001:db8::1100".parse::<Ipv6Addr>().unwrap());
        assert_eq!(subnets[15], "2001:db8::1f00".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_sub_subnet_full_length() {
        let subnets = sub_subnets("2001:db8::42".parse().unwrap(), 128, 4).unwrap();
        assert_eq!(subnets.len(), 16);
        assert_eq!(subnets[0], "2001:db8::40".parse::<Ipv6Addr>().unwrap());
        assert_eq!(subnets[15], "2001:db8::4f".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_sub_subnet_validation() {
        let addr: Ipv6Addr = "2001:db8::".parse().unwrap();
        assert!(sub_subnets(addr, 64, 0).is_err());
        assert!(sub_subnets(addr, 4, 8).is_err());
        assert!(sub_subnets(addr, 64, 17).is_err());
    }

    #[test]
    fn test_answers_indexed_by_trid() {
        let subnets = sub_subnets("2001:db8::".parse().unwrap(), 120, 2).unwrap();
        let replies = vec![
            (target(), 547, advertise(1)),
            (target(), 547, advertise(3)),
            (target(), 547, advertise(42)),
        ];
        let results = parse_answers(&subnets, &replies);
        assert_eq!(results.len(), 4);
        assert!(results[0].1.is_none());
        assert!(results[1].1.is_some());
        assert!(results[2].1.is_none());
        assert!(results[3].1.is_some());
    }
}
