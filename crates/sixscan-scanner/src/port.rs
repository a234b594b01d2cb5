//! TCP SYN port scan over address×port tuples
//!
//! Each tuple gets one SYN whose sequence number is the tuple index; the
//! reply is located by `ack - 1`, cross-checked against the tuple, and
//! classified by its flags. Tuples without a classified reply stay
//! `filtered`.

use crate::engine::{self, Drive, ScanDriver};
use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::Packet;
use rand::Rng;
use sixscan_core::config::Timing;
use sixscan_core::{PortState, Result};
use sixscan_network::ipv6::{Ipv6Builder, NEXT_TCP};
use sixscan_network::tcp6::{TcpFlags, TcpOption, TcpSegmentBuilder};
use sixscan_network::{CaptureTransport, FilterTemplate};
use std::net::Ipv6Addr;
use tracing::debug;

const FILTER: FilterTemplate = FilterTemplate("ip6 and tcp dst port {port}");

pub struct PortScanner {
    targets: Vec<(Ipv6Addr, u16)>,
    sport: u16,
    timing: Timing,
    transport: CaptureTransport,
}

struct PortDriver<'a> {
    targets: &'a [(Ipv6Addr, u16)],
    source: Ipv6Addr,
    sport: u16,
    sent: bool,
}

impl ScanDriver for PortDriver<'_> {
    type Probe = Vec<u8>;
    type Reply = Vec<u8>;

    fn drive(&self) -> Drive {
        Drive::Once
    }

    fn batch(&mut self, _results: &mut Vec<Vec<u8>>) -> Result<Option<Vec<Vec<u8>>>> {
        if self.sent {
            return Ok(None);
        }
        self.sent = true;
        let mut probes = Vec::with_capacity(self.targets.len());
        for (index, (addr, port)) in self.targets.iter().enumerate() {
            let tcp = TcpSegmentBuilder::new(self.source, *addr)
                .source_port(self.sport)
                .dest_port(*port)
                .sequence(index as u32)
                .flags(TcpFlags::SYN)
                .window(1024)
                .option(TcpOption::Mss(1460))
                .build()?;
            let packet = Ipv6Builder::new(self.source, *addr)
                .next_header(NEXT_TCP)
                .payload(tcp)
                .build()?;
            probes.push(packet);
        }
        Ok(Some(probes))
    }
}

/// Classify captured frames against the probed tuples.
fn parse_frames(targets: &[(Ipv6Addr, u16)], frames: &[Vec<u8>]) -> Vec<(Ipv6Addr, u16, PortState)> {
    let mut results: Vec<(Ipv6Addr, u16, PortState)> = targets
        .iter()
        .map(|(addr, port)| (*addr, *port, PortState::Filtered))
        .collect();

    for frame in frames {
        let Some((src, sport, flags, ack)) = tcp_reply(frame) else {
            debug!("discarding unparsable capture frame");
            continue;
        };
        let index = ack.wrapping_sub(1) as usize;
        let Some(slot) = results.get_mut(index) else {
            debug!("tcp reply ack {} matches no probe", ack);
            continue;
        };
        if slot.0 != src || slot.1 != sport {
            debug!("tcp reply from [{}]:{} does not match probe {}", src, sport, index);
            continue;
        }
        if flags.has(TcpFlags::RST) {
            slot.2 = PortState::Closed;
        } else if flags.has(TcpFlags::SYN) && flags.has(TcpFlags::ACK) {
            slot.2 = PortState::Open;
        }
    }
    results
}

fn tcp_reply(frame: &[u8]) -> Option<(Ipv6Addr, u16, TcpFlags, u32)> {
    let ether = EthernetPacket::new(frame)?;
    let ip = Ipv6Packet::new(ether.payload())?;
    let tcp = TcpPacket::new(ip.payload())?;
    Some((
        ip.get_source(),
        tcp.get_source(),
        TcpFlags(tcp.get_flags() as u8),
        tcp.get_acknowledgement(),
    ))
}

impl PortScanner {
    pub fn new(targets: Vec<(Ipv6Addr, u16)>, iface: Option<&str>, timing: Timing) -> Result<Self> {
        let sport: u16 = rand::thread_rng().gen();
        let filter = FILTER.render(&[("port", sport.to_string())]);
        let transport = CaptureTransport::new(iface, filter)?;
        Ok(Self {
            targets,
            sport,
            timing,
            transport,
        })
    }

    pub fn scan(&mut self) -> Result<Vec<(Ipv6Addr, u16, PortState)>> {
        let mut driver = PortDriver {
            targets: &self.targets,
            source: self.transport.source(),
            sport: self.sport,
            sent: false,
        };
        let frames = engine::run(&self.transport, &mut driver, &self.timing)?;
        Ok(parse_frames(&self.targets, &frames))
    }
}
