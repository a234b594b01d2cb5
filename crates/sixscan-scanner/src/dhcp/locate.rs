//! Served-prefix location by binary search
//!
//! Runs the scaler first to learn per-family acceptance ranges, then binary
//! searches the prefix length: each midpoint probe is a Solicit whose relay
//! link address is the network address of the target's supernet at that
//! length. An in-range assignment narrows the search right, anything else
//! narrows left. The scaler, the soliciting rounds and the caller share one
//! server transport so server-side state stays coherent.

use crate::dhcp::{reply_filter, supernet_network, DhcpScaler};
use crate::engine::{self, Drive, ScanDriver};
use rand::Rng;
use sixscan_core::config::Timing;
use sixscan_core::types::SubnetScales;
use sixscan_core::{Error, PrefixSearch, Result};
use sixscan_network::dhcpv6::{self, Duid};
use sixscan_network::{DgramProbe, DgramReply, DgramTransport, ReplyFilter};
use std::net::Ipv6Addr;
use tracing::debug;

pub struct DhcpLocator {
    target: Ipv6Addr,
    linkaddr: Ipv6Addr,
    count: usize,
    lossrate: f64,
    duid: Duid,
    timing: Timing,
}

/// Converged prefix length plus the scales the search was based on
#[derive(Debug, Clone)]
pub struct LocateResult {
    pub plen: u8,
    pub scales: SubnetScales,
}

struct LocateDriver<'a> {
    locator: &'a DhcpLocator,
    scales: &'a SubnetScales,
    search: PrefixSearch,
    started: bool,
}

impl LocateDriver<'_> {
    fn accepted(&self, results: &mut Vec<DgramReply>) -> bool {
        results.drain(..).any(|(_, _, buf)| {
            let message = match dhcpv6::parse_relay_reply(&buf) {
                Ok(message) => message,
                Err(e) => {
                    debug!("discarding dhcpv6 response: {}", e);
                    return false;
                }
            };
            if !message.is_advertise() {
                return false;
            }
            self.scales.iter().any(|(kind, scale)| {
                match (scale, message.ia_addr(*kind)) {
                    (Some(scale), Some(addr)) => scale.accepts(u128::from(addr)),
                    _ => false,
                }
            })
        })
    }
}

impl ScanDriver for LocateDriver<'_> {
    type Probe = DgramProbe;
    type Reply = DgramReply;

    fn drive(&self) -> Drive {
        Drive::Retry
    }

    fn batch(&mut self, results: &mut Vec<DgramReply>) -> Result<Option<Vec<DgramProbe>>> {
        if self.started {
            let accepted = self.accepted(results);
            self.search.note(accepted);
            debug!(
                "prefix search: mid accepted={} next interval ends at {}",
                accepted,
                self.search.result()
            );
        }
        self.started = true;
        if self.search.done() {
            return Ok(None);
        }
        let mid = self.search.mid();
        let linkaddr = supernet_network(self.locator.linkaddr, mid)?;
        let trid = rand::thread_rng().gen::<u32>() & 0x00ff_ffff;
        let solicit = dhcpv6::build_solicit(&self.locator.duid, trid);
        let relay = dhcpv6::wrap_relay_forward(linkaddr, &solicit);
        Ok(Some(vec![DgramProbe::new(
            self.locator.target,
            dhcpv6::SERVER_PORT,
            relay,
        )]))
    }

    fn filter(&self) -> ReplyFilter<DgramReply> {
        reply_filter(self.locator.target)
    }
}

impl DhcpLocator {
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

    /// Locate the served prefix length over a borrowed server transport.
    pub fn scan(&self, transport: &DgramTransport) -> Result<LocateResult> {
        let scaler = DhcpScaler::new(
            self.target,
            Some(self.linkaddr),
            self.count,
            self.lossrate,
            self.timing.clone(),
        );
        let scales = scaler.scan(transport)?;
        if scales.values().all(|scale| scale.is_none()) {
            return Err(Error::StatelessDhcp);
        }

        let mut driver = LocateDriver {
            locator: self,
            scales: &scales,
            search: PrefixSearch::new(),
            started: false,
        };
        engine::run(transport, &mut driver, &self.timing)?;
        let plen = driver.search.result();

        Ok(LocateResult { plen, scales })
    }
}
