//! DHCPv6 pool-regularity inference
//!
//! `count` Solicits with the probe index as transaction id; the assigned
//! NA / TA / PD of each Advertise is collected in receipt order and each
//! family is classified once enough answers came back.

use crate::dhcp::reply_filter;
use crate::engine::{self, Drive, ScanDriver};
use sixscan_core::config::Timing;
use sixscan_core::types::{IaKind, SubnetScales};
use sixscan_core::{PoolScale, Result};
use sixscan_network::dhcpv6::{self, Duid};
use sixscan_network::{DgramProbe, DgramReply, DgramTransport, ReplyFilter};
use std::net::Ipv6Addr;
use tracing::debug;

pub struct DhcpScaler {
    pub target: Ipv6Addr,
    pub linkaddr: Ipv6Addr,
    pub count: usize,
    pub lossrate: f64,
    duid: Duid,
    timing: Timing,
}

struct ScaleDriver<'a> {
    scaler: &'a DhcpScaler,
    sent: bool,
}

impl ScanDriver for ScaleDriver<'_> {
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
        let scaler = self.scaler;
        let probes = (0..scaler.count)
            .map(|trid| {
                let solicit = dhcpv6::build_solicit(&scaler.duid, trid as u32);
                let relay = dhcpv6::wrap_relay_forward(scaler.linkaddr, &solicit);
                DgramProbe::new(scaler.target, dhcpv6::SERVER_PORT, relay)
            })
            .collect();
        Ok(Some(probes))
    }

    fn filter(&self) -> ReplyFilter<DgramReply> {
        reply_filter(self.scaler.target)
    }
}

/// Collect per-family assignments in receipt order, then classify each
/// family that cleared the lossrate gate.
fn parse_scales(replies: &[DgramReply], count: usize, lossrate: f64) -> SubnetScales {
    let mut families: [(IaKind, Vec<Option<u128>>); 3] = [
        (IaKind::Na, Vec::new()),
        (IaKind::Ta, Vec::new()),
        (IaKind::Pd, Vec::new()),
    ];
    for (_, _, buf) in replies {
        let message = match dhcpv6::parse_relay_reply(buf) {
            Ok(message) => message,
            Err(e) => {
                debug!("discarding dhcpv6 response: {}", e);
                continue;
            }
        };
        if !message.is_advertise() || message.trid >= count as u32 {
            continue;
        }
        for (kind, addrs) in families.iter_mut() {
            addrs.push(message.ia_addr(*kind).map(u128::from));
        }
    }

    families
        .into_iter()
        .map(|(kind, addrs)| {
            let present: Vec<u128> = addrs.into_iter().flatten().collect();
            let scale = if (present.len() as f64) < lossrate * count as f64 {
                None
            } else {
                PoolScale::classify(&present)
            };
            (kind, scale)
        })
        .collect()
}

impl DhcpScaler {
    pub fn new(
        target: Ipv6Addr,
        linkaddr: Option<Ipv6Addr>,
        count: usize,
        lossrate: f64,
        timing: Timing,
    ) -> Self {
        Self {
            target,
            linkaddr: linkaddr.unwrap_or(target),
            count,
            lossrate,
            duid: Duid::random_link_layer(),
            timing,
        }
    }

    /// Classify the pools over a borrowed server transport.
    pub fn scan(&self, transport: &DgramTransport) -> Result<SubnetScales> {
        let mut driver = ScaleDriver {
            scaler: self,
            sent: false,
        };
        let replies = engine::run(transport, &mut driver, &self.timing)?;
        Ok(parse_scales(&replies, self.count, self.lossrate))
    }
}
