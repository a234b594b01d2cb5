//! TCP segment construction over IPv6
//!
//! Builds the TCP header and options exactly as given (the OS fingerprint
//! probes depend on option order and padding), with the IPv6 pseudo-header
//! checksum filled in.

use pnet::packet::tcp::{ipv6_checksum, MutableTcpPacket};
use sixscan_core::{Error, Result};
use std::net::Ipv6Addr;

/// TCP flags as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0b0000_0001);
    pub const SYN: TcpFlags = TcpFlags(0b0000_0010);
    pub const RST: TcpFlags = TcpFlags(0b0000_0100);
    pub const PSH: TcpFlags = TcpFlags(0b0000_1000);
    pub const ACK: TcpFlags = TcpFlags(0b0001_0000);
    pub const URG: TcpFlags = TcpFlags(0b0010_0000);
    pub const ECE: TcpFlags = TcpFlags(0b0100_0000);
    pub const CWR: TcpFlags = TcpFlags(0b1000_0000);

    pub const fn empty() -> Self {
        TcpFlags(0)
    }

    pub const fn combine(self, other: TcpFlags) -> Self {
        TcpFlags(self.0 | other.0)
    }

    pub const fn has(self, flag: TcpFlags) -> bool {
        self.0 & flag.0 != 0
    }
}

/// TCP options, serialized in the order given
#[derive(Debug, Clone)]
pub enum TcpOption {
    /// Maximum Segment Size (kind 2)
    Mss(u16),
    /// Window Scale (kind 3)
    WindowScale(u8),
    /// SACK Permitted (kind 4)
    SackPermitted,
    /// Timestamp (kind 8)
    Timestamp { tsval: u32, tsecr: u32 },
    /// No Operation (kind 1)
    Nop,
    /// End of Option List (kind 0)
    Eol,
}

impl TcpOption {
    pub fn len(&self) -> usize {
        match self {
            TcpOption::Eol | TcpOption::Nop => 1,
            TcpOption::Mss(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Timestamp { .. } => 10,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            TcpOption::Eol => buf.push(0),
            TcpOption::Nop => buf.push(1),
            TcpOption::Mss(mss) => {
                buf.extend_from_slice(&[2, 4]);
                buf.extend_from_slice(&mss.to_be_bytes());
            }
            TcpOption::WindowScale(scale) => buf.extend_from_slice(&[3, 3, *scale]),
            TcpOption::SackPermitted => buf.extend_from_slice(&[4, 2]),
            TcpOption::Timestamp { tsval, tsecr } => {
                buf.extend_from_slice(&[8, 10]);
                buf.extend_from_slice(&tsval.to_be_bytes());
                buf.extend_from_slice(&tsecr.to_be_bytes());
            }
        }
    }
}

/// Builder for a single TCP segment
#[derive(Debug, Clone)]
pub struct TcpSegmentBuilder {
    source: Ipv6Addr,
    destination: Ipv6Addr,
    source_port: u16,
    dest_port: u16,
    sequence: u32,
    acknowledgement: u32,
    flags: TcpFlags,
    window: u16,
    urgent: u16,
    options: Vec<TcpOption>,
}

impl TcpSegmentBuilder {
    pub fn new(source: Ipv6Addr, destination: Ipv6Addr) -> Self {
        Self {
            source,
            destination,
            source_port: 0,
            dest_port: 0,
            sequence: 0,
            acknowledgement: 0,
            flags: TcpFlags::empty(),
            window: 8192,
            urgent: 0,
            options: Vec::new(),
        }
    }

    pub fn source_port(mut self, port: u16) -> Self {
        self.source_port = port;
        self
    }

    pub fn dest_port(mut self, port: u16) -> Self {
        self.dest_port = port;
        self
    }

    pub fn sequence(mut self, seq: u32) -> Self {
        self.sequence = seq;
        self
    }

    pub fn acknowledgement(mut self, ack: u32) -> Self {
        self.acknowledgement = ack;
        self
    }

    pub fn flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn urgent(mut self, urgent: u16) -> Self {
        self.urgent = urgent;
        self
    }

    pub fn option(mut self, option: TcpOption) -> Self {
        self.options.push(option);
        self
    }

    /// Serialize the segment with its IPv6 checksum.
    pub fn build(self) -> Result<Vec<u8>> {
        let opt_len: usize = self.options.iter().map(|o| o.len()).sum();
        let padded = (opt_len + 3) / 4 * 4;
        if 20 + padded > 60 {
            return Err(Error::Packet(format!("tcp options too long: {}", opt_len)));
        }

        let mut options = Vec::with_capacity(padded);
        for opt in &self.options {
            opt.write(&mut options);
        }
        options.resize(padded, 0);

        let mut buffer = vec![0u8; 20 + padded];
        {
            let mut tcp = MutableTcpPacket::new(&mut buffer)
                .ok_or_else(|| Error::Packet("tcp header build failed".to_string()))?;
            tcp.set_source(self.source_port);
            tcp.set_destination(self.dest_port);
            tcp.set_sequence(self.sequence);
            tcp.set_acknowledgement(self.acknowledgement);
            tcp.set_data_offset(((20 + padded) / 4) as u8);
            tcp.set_flags(self.flags.0 as u8);
            tcp.set_window(self.window);
            tcp.set_urgent_ptr(self.urgent);
            tcp.set_checksum(0);
        }
        // Raw option bytes after the fixed header, order preserved.
        buffer[20..].copy_from_slice(&options);
        let checksum = {
            let tcp = MutableTcpPacket::new(&mut buffer)
                .ok_or_else(|| Error::Packet("tcp header build failed".to_string()))?;
            ipv6_checksum(&tcp.to_immutable(), &self.source, &self.destination)
        };
        buffer[16..18].copy_from_slice(&checksum.to_be_bytes());
        Ok(buffer)
    }
}
