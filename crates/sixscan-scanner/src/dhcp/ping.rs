//! DHCPv6 reachability probe
//!
//! Two probes per round: an Information-Request with transaction id 1 and a
//! Solicit with transaction id 2. Retrying stops once both a Reply and an
//! Advertise carrying a Server-ID have been seen. Duplicates on a
//! transaction id and parse failures are logged and skipped.

use crate::dhcp::reply_filter;
use crate::engine::{self, Drive, ScanDriver};
use sixscan_core::config::Timing;
use sixscan_core::Result;
use sixscan_network::dhcpv6::{self, DhcpMessage, Duid};
use sixscan_network::{DgramProbe, DgramReply, DgramTransport, ReplyFilter};
use std::net::Ipv6Addr;
use tracing::debug;

/// Raw Reply and Advertise captured by a ping
#[derive(Debug, Clone, Default)]
pub struct DhcpPing {
    pub reply: Option<DhcpMessage>,
    pub advertise: Option<DhcpMessage>,
}

pub struct DhcpPinger {
    target: Ipv6Addr,
    linkaddr: Ipv6Addr,
    duid: Duid,
    timing: Timing,
}

struct PingDriver<'a> {
    pinger: &'a DhcpPinger,
    sent: bool,
    ping: DhcpPing,
}

impl PingDriver<'_> {
    fn consume(&mut self, results: &mut Vec<DgramReply>) {
        for (_, _, buf) in results.drain(..) {
            let message = match dhcpv6::parse_relay_reply(&buf) {
                Ok(message) => message,
                Err(e) => {
                    debug!("discarding dhcpv6 response: {}", e);
                    continue;
                }
            };
            if message.is_reply() {
                if message.trid != 1 || !message.has_server_id() {
                    debug!("unexpected reply (trid {})", message.trid);
                } else if self.ping.reply.is_some() {
                    debug!("duplicated reply");
                } else {
                    self.ping.reply = Some(message);
                }
            } else if message.is_advertise() {
                if message.trid != 2 || !message.has_server_id() {
                    debug!("unexpected advertise (trid {})", message.trid);
                } else if self.ping.advertise.is_some() {
                    debug!("duplicated advertise");
                } else {
                    self.ping.advertise = Some(message);
                }
            }
        }
    }
}

impl ScanDriver for PingDriver<'_> {
    type Probe = DgramProbe;
    type Reply = DgramReply;

    fn drive(&self) -> Drive {
        Drive::Retry
    }

    fn batch(&mut self, _results: &mut Vec<DgramReply>) -> Result<Option<Vec<DgramProbe>>> {
        if self.sent {
            return Ok(None);
        }
        self.sent = true;
        let pinger = self.pinger;
        let inforeq = dhcpv6::wrap_relay_forward(
            pinger.linkaddr,
            &dhcpv6::build_info_request(&pinger.duid, 1),
        );
        let solicit =
            dhcpv6::wrap_relay_forward(pinger.linkaddr, &dhcpv6::build_solicit(&pinger.duid, 2));
        Ok(Some(vec![
            DgramProbe::new(pinger.target, dhcpv6::SERVER_PORT, inforeq),
            DgramProbe::new(pinger.target, dhcpv6::SERVER_PORT, solicit),
        ]))
    }

    fn filter(&self) -> ReplyFilter<DgramReply> {
        reply_filter(self.pinger.target)
    }

    fn stop_retry(&mut self, results: &mut Vec<DgramReply>) -> bool {
        self.consume(results);
        self.ping.reply.is_some() && self.ping.advertise.is_some()
    }
}

impl DhcpPinger {
    pub fn new(target: Ipv6Addr, linkaddr: Option<Ipv6Addr>, timing: Timing) -> Self {
        Self {
            target,
            linkaddr: linkaddr.unwrap_or(target),
            duid: Duid::random_link_layer(),
            timing,
        }
    }

    /// Ping over a borrowed server transport.
    pub fn scan(&self, transport: &DgramTransport) -> Result<DhcpPing> {
        let mut driver = PingDriver {
            pinger: self,
            sent: false,
            ping: DhcpPing::default(),
        };
        let mut leftover = engine::run(transport, &mut driver, &self.timing)?;
        // Replies arriving in the final quiescence were not seen by the
        // last stop_retry check.
        driver.consume(&mut leftover);
        Ok(driver.ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sixscan_network::dhcpv6::{
        MSG_ADVERTISE, MSG_RELAY_REPLY, MSG_REPLY, OPT_RELAY_MSG, OPT_SERVERID,
    };

    fn target() -> Ipv6Addr {
        "2001:db8::1".parse().unwrap()
    }

    fn relay_reply(inner: &[u8]) -> Vec<u8> {
        let mut buf = vec![MSG_RELAY_REPLY, 0];
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&OPT_RELAY_MSG.to_be_bytes());
        buf.extend_from_slice(&(inner.len() as u16).to_be_bytes());
        buf.extend_from_slice(inner);
        buf
    }

    fn message(msg_type: u8, trid: u32, server_id: bool) -> Vec<u8> {
        let mut buf = vec![msg_type];
        buf.extend_from_slice(&trid.to_be_bytes()[1..]);
        if server_id {
            buf.extend_from_slice(&OPT_SERVERID.to_be_bytes());
            buf.extend_from_slice(&4u16.to_be_bytes());
            buf.extend_from_slice(&[0, 1, 0, 1]);
        }
        buf
    }

    fn driver_with(pinger: &DhcpPinger) -> PingDriver<'_> {
        PingDriver {
            pinger,
            sent: false,
            ping: DhcpPing::default(),
        }
    }

    #[test]
    fn test_stops_when_both_seen() {
        let pinger = DhcpPinger::new(target(), None, Timing::default());
        let mut driver = driver_with(&pinger);
        let mut results = vec![
            (target(), 547, relay_reply(&message(MSG_REPLY, 1, true))),
            (target(), 547, relay_reply(&message(MSG_ADVERTISE, 2, true))),
        ];
        assert!(driver.stop_retry(&mut results));
        assert!(results.is_empty());
        assert!(driver.ping.reply.is_some());
        assert!(driver.ping.advertise.is_some());
    }

    #[test]
    fn test_keeps_retrying_with_only_reply() {
        let pinger = DhcpPinger::new(target(), None, Timing::default());
        let mut driver = driver_with(&pinger);
        let mut results = vec![(target(), 547, relay_reply(&message(MSG_REPLY, 1, true)))];
        assert!(!driver.stop_retry(&mut results));
    }

    #[test]
    fn test_rejects_missing_server_id_and_wrong_trid() {
        let pinger = DhcpPinger::new(target(), None, Timing::default());
        let mut driver = driver_with(&pinger);
        let mut results = vec![
            (target(), 547, relay_reply(&message(MSG_REPLY, 1, false))),
            (target(), 547, relay_reply(&message(MSG_ADVERTISE, 9, true))),
        ];
        assert!(!driver.stop_retry(&mut results));
        assert!(driver.ping.reply.is_none());
        assert!(driver.ping.advertise.is_none());
    }

    #[test]
    fn test_duplicate_kept_first() {
        let pinger = DhcpPinger::new(target(), None, Timing::default());
        let mut driver = driver_with(&pinger);
        let first = relay_reply(&message(MSG_REPLY, 1, true));
        let mut results = vec![(target(), 547, first)];
        driver.stop_retry(&mut results);
        let kept = driver.ping.reply.clone().unwrap();
        let mut results = vec![(target(), 547, relay_reply(&message(MSG_REPLY, 1, true)))];
        driver.stop_retry(&mut results);
        assert_eq!(driver.ping.reply.unwrap().raw, kept.raw);
    }

    #[test]
    fn test_probe_batch_shape() {
        let pinger = DhcpPinger::new(target(), None, Timing::default());
        let mut driver = driver_with(&pinger);
        let batch = driver.batch(&mut Vec::new()).unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|p| p.port == 547 && p.addr == target()));
        let first = dhcpv6::parse_relay_reply(&batch[0].payload);
        // Outbound packets are Relay-Forward, not Relay-Reply.
        assert!(first.is_err());
        assert_eq!(batch[0].payload[0], dhcpv6::MSG_RELAY_FORWARD);
        assert!(driver.batch(&mut Vec::new()).unwrap().is_none());
    }
}
