//! Hop-by-hop traceroute
//!
//! A sub-trace per hop, hop limit increasing from `hop` up to `limit`. The
//! four variants differ only in the probe and the arrival test: ICMPv6 echo
//! over the raw socket, DNS/UDP, TCP SYN and DHCPv6 Relay-Forward over the
//! capture transport. Each hop retries up to `retry` times on empty results
//! and yields an unanswered hop afterwards; the trace stops at the first
//! arrival.

use crate::engine::{self, Drive, ScanDriver};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RecordType};
use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::Packet;
use rand::Rng;
use sixscan_core::config::Timing;
use sixscan_core::{Error, HopReason, Result, TraceHop};
use sixscan_network::dhcpv6;
use sixscan_network::icmpv6;
use sixscan_network::ipv6::{Ipv6Builder, NEXT_ICMPV6, NEXT_TCP, NEXT_UDP};
use sixscan_network::tcp6::{TcpFlags, TcpSegmentBuilder};
use sixscan_network::udp6;
use sixscan_network::{
    CaptureTransport, DgramProbe, DgramReply, DgramTransport, FilterTemplate,
};
use std::net::Ipv6Addr;
use tracing::debug;

const DNS_FILTER: FilterTemplate = FilterTemplate(
    "ip6 and (icmp6[icmp6type]==icmp6-timeexceeded or \
     icmp6[icmp6type]==icmp6-destinationunreach or \
     (udp dst port {port} and udp src port {target_port} and ip6 src {target}))",
);
const SYN_FILTER: FilterTemplate = FilterTemplate(
    "ip6 and (icmp6[icmp6type]==icmp6-timeexceeded or \
     (tcp dst port {port} and tcp src port {target_port} and ip6 src {target}))",
);
const DHCP_FILTER: FilterTemplate = FilterTemplate(
    "ip6 and (icmp6[icmp6type]==icmp6-timeexceeded or \
     icmp6[icmp6type]==icmp6-destinationunreach or \
     (udp dst port 547 and udp src port 547 and ip6 src {target}))",
);

/// Probe flavor of a route trace
#[derive(Debug, Clone)]
pub enum TraceVariant {
    /// ICMPv6 Echo Request
    Ping,
    /// UDP query for an AAAA record
    Dns { name: String, port: u16 },
    /// TCP SYN towards a fixed port
    Syn { port: u16 },
    /// DHCPv6 Relay-Forward Solicit, 547 to 547
    Dhcp { linkaddr: Option<Ipv6Addr> },
}

enum TraceTransport {
    Dgram(DgramTransport),
    Capture(CaptureTransport),
}

pub struct RouteTracer {
    target: Ipv6Addr,
    variant: TraceVariant,
    first_hop: u8,
    limit: u8,
    sport: u16,
    timing: Timing,
    transport: TraceTransport,
}

/// One attempt result before it is folded into a [`TraceHop`]
type HopAnswer = (Ipv6Addr, HopReason);

impl RouteTracer {
    pub fn new(
        target: Ipv6Addr,
        variant: TraceVariant,
        iface: Option<&str>,
        first_hop: u8,
        limit: u8,
        timing: Timing,
    ) -> Result<Self> {
        if first_hop == 0 || limit < first_hop {
            return Err(Error::Config(format!(
                "invalid hop range {}..={}",
                first_hop, limit
            )));
        }
        let sport: u16 = rand::thread_rng().gen();
        let transport = match &variant {
            TraceVariant::Ping => TraceTransport::Dgram(DgramTransport::icmp6(&[
                icmpv6::ICMP6_ECHO_REPLY,
                icmpv6::ICMP6_DEST_UNREACH,
                icmpv6::ICMP6_TIME_EXCEEDED,
            ])?),
            TraceVariant::Dns { port, .. } => {
                let filter = DNS_FILTER.render(&[
                    ("port", sport.to_string()),
                    ("target_port", port.to_string()),
                    ("target", target.to_string()),
                ]);
                TraceTransport::Capture(CaptureTransport::new(iface, filter)?)
            }
            TraceVariant::Syn { port } => {
                let filter = SYN_FILTER.render(&[
                    ("port", sport.to_string()),
                    ("target_port", port.to_string()),
                    ("target", target.to_string()),
                ]);
                TraceTransport::Capture(CaptureTransport::new(iface, filter)?)
            }
            TraceVariant::Dhcp { .. } => {
                let filter = DHCP_FILTER.render(&[("target", target.to_string())]);
                TraceTransport::Capture(CaptureTransport::new(iface, filter)?)
            }
        };
        Ok(Self {
            target,
            variant,
            first_hop,
            limit,
            sport,
            timing,
            transport,
        })
    }

    /// Trace until arrival or `limit`, one entry per probed hop.
    pub fn scan(&mut self) -> Result<Vec<TraceHop>> {
        let mut hops = Vec::new();
        for hop in self.first_hop..=self.limit {
            let answer = self.trace_hop(hop)?;
            debug!("trace hop {}: {:?}", hop, answer);
            let entry = match answer {
                Some((addr, reason)) => TraceHop::answered(hop, addr, reason),
                None => TraceHop::unanswered(hop),
            };
            let arrived = entry.arrived;
            hops.push(entry);
            if arrived {
                break;
            }
        }
        Ok(hops)
    }

    fn trace_hop(&self, hop: u8) -> Result<Option<HopAnswer>> {
        for _ in 0..self.timing.retry {
            let answer = match &self.transport {
                TraceTransport::Dgram(transport) => {
                    let mut driver = PingHopDriver {
                        tracer: self,
                        hop,
                        sent: false,
                    };
                    let replies = engine::run(transport, &mut driver, &self.timing)?;
                    classify_dgram(self.target, self.sport, &replies, hop)
                }
                TraceTransport::Capture(transport) => {
                    let mut driver = CaptureHopDriver {
                        tracer: self,
                        source: transport.source(),
                        hop,
                        sent: false,
                    };
                    let frames = engine::run(transport, &mut driver, &self.timing)?;
                    classify_frames(self.target, &frames)
                }
            };
            if answer.is_some() {
                return Ok(answer);
            }
        }
        Ok(None)
    }

    fn build_capture_probe(&self, source: Ipv6Addr, hop: u8) -> Result<Vec<u8>> {
        match &self.variant {
            TraceVariant::Ping => unreachable!("ping runs on the datagram transport"),
            TraceVariant::Dns { name, port } => {
                let dns = dns_query(name)?;
                let udp = udp6::datagram(source, self.target, self.sport, *port, &dns)?;
                Ipv6Builder::new(source, self.target)
                    .hop_limit(hop)
                    .next_header(NEXT_UDP)
                    .payload(udp)
                    .build()
            }
            TraceVariant::Syn { port } => {
                let tcp = TcpSegmentBuilder::new(source, self.target)
                    .source_port(self.sport)
                    .dest_port(*port)
                    .sequence(rand::thread_rng().gen())
                    .flags(TcpFlags::SYN)
                    .build()?;
                Ipv6Builder::new(source, self.target)
                    .hop_limit(hop)
                    .next_header(NEXT_TCP)
                    .payload(tcp)
                    .build()
            }
            TraceVariant::Dhcp { linkaddr } => {
                let duid = dhcpv6::Duid::random_link_layer();
                let trid = rand::thread_rng().gen::<u32>() & 0x00ff_ffff;
                let solicit = dhcpv6::build_solicit(&duid, trid);
                let relay =
                    dhcpv6::wrap_relay_forward(linkaddr.unwrap_or(self.target), &solicit);
                let udp = udp6::datagram(
                    source,
                    self.target,
                    dhcpv6::SERVER_PORT,
                    dhcpv6::SERVER_PORT,
                    &relay,
                )?;
                Ipv6Builder::new(source, self.target)
                    .hop_limit(hop)
                    .random_flow_label()
                    .next_header(NEXT_UDP)
                    .payload(udp)
                    .build()
            }
        }
    }
}

fn classify_dgram(
    target: Ipv6Addr,
    sport: u16,
    replies: &[DgramReply],
    hop: u8,
) -> Option<HopAnswer> {
    for (addr, _, buf) in replies {
        let Some((ty, code)) = icmpv6::type_code(buf) else {
            continue;
        };
        match ty {
            icmpv6::ICMP6_ECHO_REPLY => {
                if *addr == target
                    && icmpv6::parse_echo_reply(buf)
                        .is_some_and(|(id, seq)| id == sport && seq == hop as u16)
                {
                    return Some((*addr, HopReason::Arrived));
                }
            }
            icmpv6::ICMP6_TIME_EXCEEDED | icmpv6::ICMP6_DEST_UNREACH => {
                if icmpv6::invoking_dest(buf) != Some(target) {
                    debug!("icmpv6 error for a foreign flow from {}", addr);
                    continue;
                }
                let reason = if ty == icmpv6::ICMP6_TIME_EXCEEDED {
                    HopReason::TimeExceeded
                } else {
                    HopReason::from_unreach_code(code)
                };
                return Some((*addr, reason));
            }
            _ => {}
        }
    }
    None
}

fn classify_frames(target: Ipv6Addr, frames: &[Vec<u8>]) -> Option<HopAnswer> {
    for frame in frames {
        let Some(ip) = EthernetPacket::new(frame)
            .map(|e| e.payload().to_vec())
            .and_then(Ipv6Packet::owned)
        else {
            continue;
        };
        let src = ip.get_source();
        match ip.get_next_header().0 {
            NEXT_UDP | NEXT_TCP => return Some((src, HopReason::Arrived)),
            NEXT_ICMPV6 => {
                let Some(icmp) = Icmpv6Packet::new(ip.payload()) else {
                    continue;
                };
                let ty = icmp.get_icmpv6_type().0;
                let code = icmp.get_icmpv6_code().0;
                if ty != icmpv6::ICMP6_TIME_EXCEEDED && ty != icmpv6::ICMP6_DEST_UNREACH {
                    continue;
                }
                if icmpv6::invoking_dest(ip.payload()) != Some(target) {
                    debug!("icmpv6 error for a foreign flow from {}", src);
                    continue;
                }
                let reason = if ty == icmpv6::ICMP6_TIME_EXCEEDED {
                    HopReason::TimeExceeded
                } else {
                    HopReason::from_unreach_code(code)
                };
                return Some((src, reason));
            }
            _ => continue,
        }
    }
    None
}

struct PingHopDriver<'a> {
    tracer: &'a RouteTracer,
    hop: u8,
    sent: bool,
}

impl ScanDriver for PingHopDriver<'_> {
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
        let echo = icmpv6::echo_request(self.tracer.sport, self.hop as u16, &[]);
        Ok(Some(vec![
            DgramProbe::new(self.tracer.target, 0, echo).with_hop_limit(self.hop),
        ]))
    }
}

struct CaptureHopDriver<'a> {
    tracer: &'a RouteTracer,
    source: Ipv6Addr,
    hop: u8,
    sent: bool,
}

impl ScanDriver for CaptureHopDriver<'_> {
    type Probe = Vec<u8>;
    type Reply = Vec<u8>;

    fn drive(&self) -> Drive {
        Drive::OnceWait
    }

    fn batch(&mut self, _results: &mut Vec<Vec<u8>>) -> Result<Option<Vec<Vec<u8>>>> {
        if self.sent {
            return Ok(None);
        }
        self.sent = true;
        Ok(Some(vec![self.tracer.build_capture_probe(self.source, self.hop)?]))
    }
}

/// Serialized AAAA query for the DNS probe payload
fn dns_query(name: &str) -> Result<Vec<u8>> {
    let name = Name::from_ascii(name)
        .map_err(|e| Error::Config(format!("invalid query name {:?}: {}", name, e)))?;
    let mut message = Message::new();
    message
        .set_id(rand::thread_rng().gen())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, RecordType::AAAA));
    message
        .to_vec()
        .map_err(|e| Error::Packet(format!("dns encode: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};

    const TARGET: &str = "2001:db8::42";
    const SPORT: u16 = 0x1234;

    fn target() -> Ipv6Addr {
        TARGET.parse().unwrap()
    }

    fn echo_reply(ident: u16, seq: u16) -> Vec<u8> {
        let mut buf = icmpv6::echo_request(ident, seq, &[]);
        buf[0] = icmpv6::ICMP6_ECHO_REPLY;
        buf
    }

    fn icmp_error(ty: u8, code: u8, inner_dst: Ipv6Addr) -> Vec<u8> {
        let mut inner = vec![0u8; 40];
        inner[0] = 0x60;
        inner[24..40].copy_from_slice(&inner_dst.octets());
        let mut buf = vec![ty, code, 0, 0, 0, 0, 0, 0];
        buf.extend_from_slice(&inner);
        buf
    }

    fn ether_frame(ip: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 14 + ip.len()];
        {
            let mut ether = MutableEthernetPacket::new(&mut buf).unwrap();
            ether.set_ethertype(EtherTypes::Ipv6);
        }
        buf[14..].copy_from_slice(ip);
        buf
    }

    #[test]
    fn test_ping_arrival() {
        let replies = vec![(target(), 0u16, echo_reply(SPORT, 2))];
        let answer = classify_dgram(target(), SPORT, &replies, 2).unwrap();
        assert_eq!(answer, (target(), HopReason::Arrived));
    }

    #[test]
    fn test_ping_wrong_sequence_not_arrival() {
        let replies = vec![(target(), 0u16, echo_reply(SPORT, 3))];
        assert!(classify_dgram(target(), SPORT, &replies, 2).is_none());
    }

    #[test]
    fn test_ping_intermediate_time_exceeded() {
        let router: Ipv6Addr = "fe80::1".parse().unwrap();
        let replies = vec![(
            router,
            0u16,
            icmp_error(icmpv6::ICMP6_TIME_EXCEEDED, 0, target()),
        )];
        let answer = classify_dgram(target(), SPORT, &replies, 1).unwrap();
        assert_eq!(answer, (router, HopReason::TimeExceeded));
    }

    #[test]
    fn test_ping_foreign_flow_skipped() {
        let router: Ipv6Addr = "fe80::1".parse().unwrap();
        let other: Ipv6Addr = "2001:db8::99".parse().unwrap();
        let replies = vec![(
            router,
            0u16,
            icmp_error(icmpv6::ICMP6_TIME_EXCEEDED, 0, other),
        )];
        assert!(classify_dgram(target(), SPORT, &replies, 1).is_none());
    }

    #[test]
    fn test_dest_unreach_is_arrival_with_reason() {
        let replies = vec![(
            target(),
            0u16,
            icmp_error(icmpv6::ICMP6_DEST_UNREACH, 4, target()),
        )];
        let (addr, reason) = classify_dgram(target(), SPORT, &replies, 3).unwrap();
        assert_eq!(addr, target());
        assert_eq!(reason, HopReason::DestPort);
        assert!(reason.arrived());
    }

    #[test]
    fn test_frame_udp_reply_is_arrival() {
        let src = target();
        let udp = udp6::datagram(src, "2001:db8::aa".parse().unwrap(), 53, SPORT, b"x").unwrap();
        let ip = Ipv6Builder::new(src, "2001:db8::aa".parse().unwrap())
            .next_header(NEXT_UDP)
            .payload(udp)
            .build()
            .unwrap();
        let answer = classify_frames(target(), &[ether_frame(&ip)]).unwrap();
        assert_eq!(answer, (src, HopReason::Arrived));
    }

    #[test]
    fn test_frame_time_exceeded_intermediate() {
        let router: Ipv6Addr = "fe80::1".parse().unwrap();
        let icmp = icmp_error(icmpv6::ICMP6_TIME_EXCEEDED, 0, target());
        let ip = Ipv6Builder::new(router, "2001:db8::aa".parse().unwrap())
            .next_header(NEXT_ICMPV6)
            .payload(icmp)
            .build()
            .unwrap();
        let answer = classify_frames(target(), &[ether_frame(&ip)]).unwrap();
        assert_eq!(answer, (router, HopReason::TimeExceeded));
    }

    #[test]
    fn test_scan_scenario_shapes() {
        // Scenario: hop 1 time-exceeded from fe80::1, hop 2 arrival.
        let target: Ipv6Addr = "2001:db8::42".parse().unwrap();
        let router: Ipv6Addr = "fe80::1".parse().unwrap();
        let hop1 = TraceHop::answered(1, router, HopReason::TimeExceeded);
        let hop2 = TraceHop::answered(2, target, HopReason::Arrived);
        assert!(!hop1.arrived);
        assert!(hop2.arrived);
        assert_eq!(hop1.reason.unwrap().as_str(), "time exceeded");
        assert_eq!(hop2.reason.unwrap().as_str(), "arrived");
    }

    #[test]
    fn test_dns_query_encodes() {
        let query = dns_query("www.google.com").unwrap();
        assert!(query.len() > 12);
        // QDCOUNT == 1
        assert_eq!(u16::from_be_bytes([query[4], query[5]]), 1);
    }

    #[test]
    fn test_invalid_hop_range_rejected() {
        let target: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(RouteTracer::new(
            target,
            TraceVariant::Ping,
            None,
            3,
            2,
            Timing::default()
        )
        .is_err());
    }
}
