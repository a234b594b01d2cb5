//! Nmap-style OS fingerprint probes
//!
//! Eleven probe classes against one target: TECN, the six-SYN T1 sequence
//! (three rounds), T2..T7, U1, IE1 and IE2. Each class runs on its own
//! capture transport with a class-specific BPF filter and contributes zero
//! or one raw reply packet per fingerprint name. Failures of one class are
//! logged and do not stop the rest.

use crate::engine::{self, Drive, ScanDriver};
use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;
use rand::Rng;
use sixscan_core::config::Timing;
use sixscan_core::{Error, Result};
use sixscan_network::icmpv6;
use sixscan_network::ipv6::{ExtensionHeader, Ipv6Builder, NEXT_ICMPV6, NEXT_TCP, NEXT_UDP};
use sixscan_network::tcp6::{TcpFlags, TcpOption, TcpSegmentBuilder};
use sixscan_network::udp6;
use sixscan_network::{CaptureTransport, FilterTemplate};
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use tracing::{error, warn};

const TCP_FILTER: FilterTemplate =
    FilterTemplate("ip6 and tcp dst port {port} and tcp src port {target_port}");
const U1_FILTER: FilterTemplate = FilterTemplate(
    "ip6 src {target} and icmp6[icmp6type]==icmp6-destinationunreach and icmp6[icmp6code]==4",
);
const IE1_FILTER: FilterTemplate = FilterTemplate(
    "ip6 src {target} and icmp6[icmp6type]==icmp6-echoreply and icmp6[4:2]=={port}",
);
const IE2_FILTER: FilterTemplate = FilterTemplate(
    "ip6 src {target} and ((icmp6[icmp6type]==icmp6-echoreply and icmp6[4:2]=={port}) or \
     icmp6[icmp6type]==icmp6-parameterproblem)",
);

/// Window and option list of each T1 SYN (S1..S6)
const T1_ARGS: [(u16, &[TcpOption]); 6] = [
    (
        1,
        &[
            TcpOption::WindowScale(10),
            TcpOption::Nop,
            TcpOption::Mss(1460),
            TcpOption::Timestamp {
                tsval: 0xffff_ffff,
                tsecr: 0,
            },
            TcpOption::SackPermitted,
        ],
    ),
    (
        63,
        &[
            TcpOption::Mss(1400),
            TcpOption::WindowScale(0),
            TcpOption::SackPermitted,
            TcpOption::Timestamp {
                tsval: 0xffff_ffff,
                tsecr: 0,
            },
            TcpOption::Eol,
        ],
    ),
    (
        4,
        &[
            TcpOption::Timestamp {
                tsval: 0xffff_ffff,
                tsecr: 0,
            },
            TcpOption::Nop,
            TcpOption::Nop,
            TcpOption::WindowScale(5),
            TcpOption::Nop,
            TcpOption::Mss(640),
        ],
    ),
    (
        4,
        &[
            TcpOption::SackPermitted,
            TcpOption::Timestamp {
                tsval: 0xffff_ffff,
                tsecr: 0,
            },
            TcpOption::WindowScale(10),
            TcpOption::Eol,
        ],
    ),
    (
        16,
        &[
            TcpOption::Mss(536),
            TcpOption::SackPermitted,
            TcpOption::Timestamp {
                tsval: 0xffff_ffff,
                tsecr: 0,
            },
            TcpOption::WindowScale(10),
            TcpOption::Eol,
        ],
    ),
    (
        512,
        &[
            TcpOption::Mss(265),
            TcpOption::SackPermitted,
            TcpOption::Timestamp {
                tsval: 0xffff_ffff,
                tsecr: 0,
            },
        ],
    ),
];

/// Fingerprint name to captured IPv6 packet bytes
pub type OsFingerprint = BTreeMap<String, Option<Vec<u8>>>;

pub struct OsScanner {
    target: Ipv6Addr,
    open_port: u16,
    closed_port: u16,
    iface: Option<String>,
    timing: Timing,
}

/// Single probe batch retried until a reply lands
struct OneShot {
    probes: Vec<Vec<u8>>,
    sent: bool,
}

impl ScanDriver for OneShot {
    type Probe = Vec<u8>;
    type Reply = Vec<u8>;

    fn drive(&self) -> Drive {
        Drive::Retry
    }

    fn batch(&mut self, _results: &mut Vec<Vec<u8>>) -> Result<Option<Vec<Vec<u8>>>> {
        if self.sent {
            return Ok(None);
        }
        self.sent = true;
        Ok(Some(self.probes.clone()))
    }
}

/// Three rounds of the six T1 SYNs; each round's replies are partitioned
/// into their six slots before the next round starts.
struct T1Driver {
    probes: Vec<Vec<u8>>,
    initial_seq: u32,
    round: usize,
    slots: Vec<Option<Vec<u8>>>,
}

impl T1Driver {
    fn new(probes: Vec<Vec<u8>>, initial_seq: u32) -> Self {
        Self {
            probes,
            initial_seq,
            round: 0,
            slots: vec![None; 18],
        }
    }

    fn partition(&mut self, round: usize, frames: Vec<Vec<u8>>) {
        for frame in frames {
            let Some((ack, packet)) = tcp_ack_and_packet(&frame) else {
                continue;
            };
            let index = ack.wrapping_sub(self.initial_seq).wrapping_sub(1) as usize;
            if index < 6 {
                self.slots[round * 6 + index].get_or_insert(packet);
            } else {
                warn!("t1 reply with unexpected ack {:#x}", ack);
            }
        }
    }
}

impl ScanDriver for T1Driver {
    type Probe = Vec<u8>;
    type Reply = Vec<u8>;

    fn drive(&self) -> Drive {
        Drive::Retry
    }

    fn batch(&mut self, results: &mut Vec<Vec<u8>>) -> Result<Option<Vec<Vec<u8>>>> {
        if self.round > 0 {
            let frames = std::mem::take(results);
            self.partition(self.round - 1, frames);
        }
        if self.round == 3 {
            return Ok(None);
        }
        self.round += 1;
        Ok(Some(self.probes.clone()))
    }
}

fn tcp_ack_and_packet(frame: &[u8]) -> Option<(u32, Vec<u8>)> {
    let ether = EthernetPacket::new(frame)?;
    let packet = ether.payload().to_vec();
    let ip = Ipv6Packet::new(&packet)?;
    let ack = TcpPacket::new(ip.payload())?.get_acknowledgement();
    Some((ack, packet))
}

/// IPv6 portion of the first captured frame
fn first_packet(frames: &[Vec<u8>]) -> Option<Vec<u8>> {
    frames
        .first()
        .and_then(|frame| EthernetPacket::new(frame).map(|e| e.payload().to_vec()))
}

impl OsScanner {
    pub fn new(
        target: Ipv6Addr,
        open_port: Option<u16>,
        closed_port: Option<u16>,
        iface: Option<String>,
        timing: Timing,
    ) -> Result<Self> {
        let open_port =
            open_port.ok_or_else(|| Error::Config("no open port specified".to_string()))?;
        let closed_port =
            closed_port.ok_or_else(|| Error::Config("no closed port specified".to_string()))?;
        Ok(Self {
            target,
            open_port,
            closed_port,
            iface,
            timing,
        })
    }

    /// Run all probe classes and collect a name-to-packet map.
    pub fn scan(&mut self) -> Result<OsFingerprint> {
        let mut results: OsFingerprint = BTreeMap::new();
        for round in 1..=3 {
            for probe in 1..=6 {
                results.insert(format!("S{}#{}", probe, round), None);
            }
        }
        for name in ["TECN", "T2", "T3", "T4", "T5", "T6", "T7", "U1", "IE1", "IE2"] {
            results.insert(name.to_string(), None);
        }

        if let Err(e) = self.run_t1(&mut results) {
            error!("probe T1 failed: {}", e);
        }

        let singles: [(&str, fn(&OsScanner, &mut OsFingerprint) -> Result<()>); 10] = [
            ("TECN", Self::run_tecn),
            ("T2", |s, r| s.run_tn("T2", s.open_port, TcpFlags::empty(), 128, r)),
            ("T3", |s, r| {
                let flags = TcpFlags::FIN
                    .combine(TcpFlags::SYN)
                    .combine(TcpFlags::PSH)
                    .combine(TcpFlags::URG);
                s.run_tn("T3", s.open_port, flags, 256, r)
            }),
            ("T4", |s, r| s.run_tn("T4", s.open_port, TcpFlags::ACK, 1024, r)),
            ("T5", |s, r| s.run_tn("T5", s.closed_port, TcpFlags::SYN, 31337, r)),
            ("T6", |s, r| s.run_tn("T6", s.closed_port, TcpFlags::ACK, 32768, r)),
            ("T7", |s, r| {
                let flags = TcpFlags::FIN.combine(TcpFlags::PSH).combine(TcpFlags::URG);
                s.run_tn("T7", s.closed_port, flags, 65535, r)
            }),
            ("U1", Self::run_u1),
            ("IE1", Self::run_ie1),
            ("IE2", Self::run_ie2),
        ];
        for (name, class) in singles {
            if let Err(e) = class(self, &mut results) {
                error!("probe {} failed: {}", name, e);
            }
        }
        Ok(results)
    }

    fn tcp_transport(&self, sport: u16, target_port: u16) -> Result<CaptureTransport> {
        let filter = TCP_FILTER.render(&[
            ("port", sport.to_string()),
            ("target_port", target_port.to_string()),
        ]);
        CaptureTransport::new(self.iface.as_deref(), filter)
    }

    fn run_one(
        &self,
        name: &str,
        transport: &CaptureTransport,
        probes: Vec<Vec<u8>>,
        results: &mut OsFingerprint,
    ) -> Result<()> {
        let mut driver = OneShot {
            probes,
            sent: false,
        };
        let frames = engine::run(transport, &mut driver, &self.timing)?;
        results.insert(name.to_string(), first_packet(&frames));
        Ok(())
    }

    fn run_t1(&self, results: &mut OsFingerprint) -> Result<()> {
        let mut rng = rand::thread_rng();
        let sport: u16 = rng.gen();
        let initial_seq: u32 = rng.gen_range(0..1 << 31);
        let transport = self.tcp_transport(sport, self.open_port)?;

        let mut probes = Vec::with_capacity(6);
        for (index, (window, options)) in T1_ARGS.iter().enumerate() {
            let mut builder = TcpSegmentBuilder::new(transport.source(), self.target)
                .source_port(sport)
                .dest_port(self.open_port)
                .sequence(initial_seq + index as u32)
                .flags(TcpFlags::SYN)
                .window(*window);
            for option in *options {
                builder = builder.option(option.clone());
            }
            let tcp = builder.build()?;
            probes.push(
                Ipv6Builder::new(transport.source(), self.target)
                    .next_header(NEXT_TCP)
                    .payload(tcp)
                    .build()?,
            );
        }

        let mut driver = T1Driver::new(probes, initial_seq);
        engine::run(&transport, &mut driver, &self.timing)?;

        for (slot, packet) in driver.slots.into_iter().enumerate() {
            let name = format!("S{}#{}", slot % 6 + 1, slot / 6 + 1);
            results.insert(name, packet);
        }
        Ok(())
    }

    fn run_tecn(&self, results: &mut OsFingerprint) -> Result<()> {
        let sport: u16 = rand::thread_rng().gen();
        let transport = self.tcp_transport(sport, self.open_port)?;
        let tcp = TcpSegmentBuilder::new(transport.source(), self.target)
            .source_port(sport)
            .dest_port(self.open_port)
            .sequence(rand::thread_rng().gen())
            .flags(TcpFlags::SYN.combine(TcpFlags::ECE).combine(TcpFlags::CWR))
            .window(3)
            .urgent(0xf7f5)
            .option(TcpOption::WindowScale(10))
            .option(TcpOption::Nop)
            .option(TcpOption::Mss(1460))
            .option(TcpOption::SackPermitted)
            .option(TcpOption::Nop)
            .option(TcpOption::Nop)
            .build()?;
        let probe = Ipv6Builder::new(transport.source(), self.target)
            .next_header(NEXT_TCP)
            .payload(tcp)
            .build()?;
        self.run_one("TECN", &transport, vec![probe], results)
    }

    fn run_tn(
        &self,
        name: &str,
        target_port: u16,
        flags: TcpFlags,
        window: u16,
        results: &mut OsFingerprint,
    ) -> Result<()> {
        let sport: u16 = rand::thread_rng().gen();
        let transport = self.tcp_transport(sport, target_port)?;
        let tcp = TcpSegmentBuilder::new(transport.source(), self.target)
            .source_port(sport)
            .dest_port(target_port)
            .sequence(rand::thread_rng().gen())
            .flags(flags)
            .window(window)
            .build()?;
        let probe = Ipv6Builder::new(transport.source(), self.target)
            .next_header(NEXT_TCP)
            .payload(tcp)
            .build()?;
        self.run_one(name, &transport, vec![probe], results)
    }

    fn run_u1(&self, results: &mut OsFingerprint) -> Result<()> {
        let mut rng = rand::thread_rng();
        let sport: u16 = rng.gen();
        let filter = U1_FILTER.render(&[("target", self.target.to_string())]);
        let transport = CaptureTransport::new(self.iface.as_deref(), filter)?;

        let mut probes = Vec::with_capacity(3);
        for _ in 0..3 {
            let udp = udp6::datagram(
                transport.source(),
                self.target,
                sport,
                rng.gen(),
                &icmpv6::random_payload(),
            )?;
            probes.push(
                Ipv6Builder::new(transport.source(), self.target)
                    .random_flow_label()
                    .next_header(NEXT_UDP)
                    .payload(udp)
                    .build()?,
            );
        }
        self.run_one("U1", &transport, probes, results)
    }

    fn run_ie1(&self, results: &mut OsFingerprint) -> Result<()> {
        let mut rng = rand::thread_rng();
        let ident: u16 = rng.gen();
        let filter = IE1_FILTER.render(&[
            ("target", self.target.to_string()),
            ("port", ident.to_string()),
        ]);
        let transport = CaptureTransport::new(self.iface.as_deref(), filter)?;

        let code = 128 + rng.gen_range(0..128) as u8;
        let echo = icmpv6::echo_request_packet(
            transport.source(),
            self.target,
            code,
            ident,
            rng.gen(),
            &icmpv6::random_payload(),
        );
        let probe = Ipv6Builder::new(transport.source(), self.target)
            .random_flow_label()
            .next_header(NEXT_ICMPV6)
            .extension(ExtensionHeader::HopByHop(ExtensionHeader::pad4()))
            .payload(echo)
            .build()?;
        self.run_one("IE1", &transport, vec![probe], results)
    }

    fn run_ie2(&self, results: &mut OsFingerprint) -> Result<()> {
        let mut rng = rand::thread_rng();
        let ident: u16 = rng.gen();
        let filter = IE2_FILTER.render(&[
            ("target", self.target.to_string()),
            ("port", ident.to_string()),
        ]);
        let transport = CaptureTransport::new(self.iface.as_deref(), filter)?;

        let echo = icmpv6::echo_request_packet(
            transport.source(),
            self.target,
            0,
            ident,
            rng.gen(),
            &icmpv6::random_payload(),
        );
        let probe = Ipv6Builder::new(transport.source(), self.target)
            .random_flow_label()
            .next_header(NEXT_ICMPV6)
            .extension(ExtensionHeader::HopByHop(ExtensionHeader::pad4()))
            .extension(ExtensionHeader::DestinationOptions(ExtensionHeader::pad4()))
            .extension(ExtensionHeader::Routing)
            .extension(ExtensionHeader::HopByHop(ExtensionHeader::pad4()))
            .payload(echo)
            .build()?;
        self.run_one("IE2", &transport, vec![probe], results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};

    fn ether_frame(ip: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 14 + ip.len()];
        {
            let mut ether = MutableEthernetPacket::new(&mut buf).unwrap();
            ether.set_ethertype(EtherTypes::Ipv6);
        }
        buf[14..].copy_from_slice(ip);
        buf
    }

    fn synack_frame(initial_seq: u32, probe_index: u32) -> Vec<u8> {
        let src: Ipv6Addr = "2001:db8::42".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::aa".parse().unwrap();
        let tcp = TcpSegmentBuilder::new(src, dst)
            .source_port(80)
            .dest_port(0x4444)
            .sequence(0x7777)
            .acknowledgement(initial_seq + probe_index + 1)
            .flags(TcpFlags::SYN.combine(TcpFlags::ACK))
            .build()
            .unwrap();
        let ip = Ipv6Builder::new(src, dst)
            .next_header(NEXT_TCP)
            .payload(tcp)
            .build()
            .unwrap();
        ether_frame(&ip)
    }

    #[test]
    fn test_t1_partition_slots() {
        let initial_seq = 0x1000;
        let mut driver = T1Driver::new(vec![vec![]; 6], initial_seq);

        let mut results = Vec::new();
        assert!(driver.batch(&mut results).unwrap().is_some()); // round 1 sent
        // Round 1 answered S1 and S3; round 2 starts by partitioning them.
        results = vec![synack_frame(initial_seq, 0), synack_frame(initial_seq, 2)];
        assert!(driver.batch(&mut results).unwrap().is_some()); // round 2 sent
        assert!(results.is_empty());
        results = vec![synack_frame(initial_seq, 5)];
        assert!(driver.batch(&mut results).unwrap().is_some()); // round 3 sent
        results = Vec::new();
        assert!(driver.batch(&mut results).unwrap().is_none());

        assert!(driver.slots[0].is_some()); // S1#1
        assert!(driver.slots[2].is_some()); // S3#1
        assert!(driver.slots[1].is_none()); // S2#1
        assert!(driver.slots[6 + 5].is_some()); // S6#2
        assert!(driver.slots[17].is_none());
    }

    #[test]
    fn test_t1_partition_round_offsets() {
        let initial_seq = 0x2000;
        let mut driver = T1Driver::new(vec![vec![]; 6], initial_seq);
        driver.partition(1, vec![synack_frame(initial_seq, 3)]);
        assert!(driver.slots[6 + 3].is_some()); // S4#2
        driver.partition(2, vec![synack_frame(initial_seq, 0)]);
        assert!(driver.slots[12].is_some()); // S1#3
    }

    #[test]
    fn test_t1_invalid_ack_dropped() {
        let initial_seq = 0x3000;
        let mut driver = T1Driver::new(vec![vec![]; 6], initial_seq);
        driver.partition(0, vec![synack_frame(initial_seq, 17)]);
        assert!(driver.slots.iter().all(|slot| slot.is_none()));
    }

    #[test]
    fn test_fingerprint_names() {
        // Every class contributes its names even before any packet arrives.
        let mut names: Vec<String> = Vec::new();
        for round in 1..=3 {
            for probe in 1..=6 {
                names.push(format!("S{}#{}", probe, round));
            }
        }
        names.extend(
            ["TECN", "T2", "T3", "T4", "T5", "T6", "T7", "U1", "IE1", "IE2"]
                .iter()
                .map(|s| s.to_string()),
        );
        assert_eq!(names.len(), 28);
        assert!(names.contains(&"S6#3".to_string()));
    }

    #[test]
    fn test_first_packet_strips_ethernet() {
        let ip = Ipv6Builder::new(
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
        )
        .next_header(NEXT_TCP)
        .payload(vec![0xde, 0xad])
        .build()
        .unwrap();
        let frames = vec![ether_frame(&ip)];
        assert_eq!(first_packet(&frames), Some(ip));
        assert_eq!(first_packet(&[]), None);
    }

    #[test]
    fn test_missing_ports_rejected() {
        let target: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(OsScanner::new(target, None, Some(1), None, Timing::default()).is_err());
        assert!(OsScanner::new(target, Some(1), None, None, Timing::default()).is_err());
        assert!(OsScanner::new(target, Some(80), Some(81), None, Timing::default()).is_ok());
    }
}
