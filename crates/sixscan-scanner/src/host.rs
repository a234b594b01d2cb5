//! ICMPv6 echo sweep over a target list
//!
//! One Echo Request per target with the scanner's random identifier and the
//! target index as sequence number. Replies are matched by identifier at the
//! kernel filter and by sequence/source at parse time.

use crate::engine::{self, Drive, ScanDriver};
use rand::Rng;
use sixscan_core::config::Timing;
use sixscan_core::Result;
use sixscan_network::icmpv6;
use sixscan_network::{DgramProbe, DgramReply, DgramTransport, ReplyFilter};
use std::net::Ipv6Addr;
use std::sync::Arc;
use tracing::debug;

pub struct HostScanner {
    targets: Vec<Ipv6Addr>,
    ident: u16,
    timing: Timing,
    transport: DgramTransport,
}

struct HostDriver<'a> {
    targets: &'a [Ipv6Addr],
    ident: u16,
    sent: bool,
}

impl ScanDriver for HostDriver<'_> {
    type Probe = DgramProbe;
    type Reply = DgramReply;

    fn drive(&self) -> Drive {
        Drive::Once
    }

    fn batch(&mut self, _results: &mut Vec<DgramReply>) -> Result<Option<Vec<DgramProbe>>> {
        if self.sent {
            return Ok(None);
        }
        self.sent = true;
        let probes = self
            .targets
            .iter()
            .enumerate()
            .map(|(seq, target)| {
                let echo =
                    icmpv6::echo_request(self.ident, seq as u16, &icmpv6::random_payload());
                DgramProbe::new(*target, 0, echo)
            })
            .collect();
        Ok(Some(probes))
    }

    fn filter(&self) -> ReplyFilter<DgramReply> {
        let ident = self.ident;
        Arc::new(move |(_, _, buf)| {
            icmpv6::parse_echo_reply(buf).is_some_and(|(id, _)| id == ident)
        })
    }
}

/// Mark a target alive when a reply's sequence indexes it and the source
/// matches; anything else is discarded.
fn parse_replies(targets: &[Ipv6Addr], replies: Vec<DgramReply>) -> Vec<(Ipv6Addr, bool)> {
    let mut results: Vec<(Ipv6Addr, bool)> = targets.iter().map(|t| (*t, false)).collect();
    for (addr, _, buf) in replies {
        let Some((_, seq)) = icmpv6::parse_echo_reply(&buf) else {
            debug!("discarding malformed echo reply from {}", addr);
            continue;
        };
        match results.get_mut(seq as usize) {
            Some(slot) if slot.0 == addr => slot.1 = true,
            _ => debug!("echo reply seq {} from {} matches no probe", seq, addr),
        }
    }
    results
}

impl HostScanner {
    pub fn new(targets: Vec<Ipv6Addr>, timing: Timing) -> Result<Self> {
        let transport = DgramTransport::icmp6(&[icmpv6::ICMP6_ECHO_REPLY])?;
        Ok(Self {
            targets,
            ident: rand::thread_rng().gen(),
            timing,
            transport,
        })
    }

    /// Sweep every target once; earlier results are discarded.
    pub fn scan(&mut self) -> Result<Vec<(Ipv6Addr, bool)>> {
        let mut driver = HostDriver {
            targets: &self.targets,
            ident: self.ident,
            sent: false,
        };
        let replies = engine::run(&self.transport, &mut driver, &self.timing)?;
        Ok(parse_replies(&self.targets, replies))
    }
}
