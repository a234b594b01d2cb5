//! IPv6 packet building (RFC 8200)
//!
//! Fixed 40-byte header plus optional Hop-by-Hop / Destination-Options /
//! Routing extension headers, as the OS fingerprint probes require. The
//! `payload` is the already-serialized upper-layer message.

use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv6::MutableIpv6Packet;
use rand::Rng;
use sixscan_core::{Error, Result};
use std::net::Ipv6Addr;

pub const NEXT_TCP: u8 = 6;
pub const NEXT_UDP: u8 = 17;
pub const NEXT_ICMPV6: u8 = 58;

/// Extension headers supported by the probe builders
#[derive(Debug, Clone)]
pub enum ExtensionHeader {
    /// Hop-by-Hop Options (type 0)
    HopByHop(Vec<u8>),
    /// Routing header, type 0 with no segments (type 43)
    Routing,
    /// Destination Options (type 60)
    DestinationOptions(Vec<u8>),
}

impl ExtensionHeader {
    /// PadN option covering four bytes, the filler the Nmap IE probes use
    pub fn pad4() -> Vec<u8> {
        vec![1, 4, 0, 0, 0, 0]
    }

    pub fn header_type(&self) -> u8 {
        match self {
            ExtensionHeader::HopByHop(_) => 0,
            ExtensionHeader::Routing => 43,
            ExtensionHeader::DestinationOptions(_) => 60,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ExtensionHeader::Routing => 8,
            ExtensionHeader::HopByHop(data) | ExtensionHeader::DestinationOptions(data) => {
                // next-header + length + options, padded to a multiple of 8
                (data.len() + 2 + 7) / 8 * 8
            }
        }
    }

    fn build(&self, next_header: u8) -> Vec<u8> {
        match self {
            ExtensionHeader::Routing => {
                // routing type 0, segments left 0, 4 reserved bytes
                vec![next_header, 0, 0, 0, 0, 0, 0, 0]
            }
            ExtensionHeader::HopByHop(data) | ExtensionHeader::DestinationOptions(data) => {
                let len = self.size();
                let mut buf = vec![0u8; len];
                buf[0] = next_header;
                buf[1] = (len / 8 - 1) as u8;
                buf[2..2 + data.len()].copy_from_slice(data);
                buf
            }
        }
    }
}

/// Builder for complete IPv6 packets
#[derive(Debug, Clone)]
pub struct Ipv6Builder {
    source: Ipv6Addr,
    destination: Ipv6Addr,
    hop_limit: u8,
    flow_label: u32,
    next_header: u8,
    extensions: Vec<ExtensionHeader>,
    payload: Vec<u8>,
}

impl Ipv6Builder {
    pub fn new(source: Ipv6Addr, destination: Ipv6Addr) -> Self {
        Self {
            source,
            destination,
            hop_limit: 64,
            flow_label: 0,
            next_header: 59, // no next header until set
            extensions: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn hop_limit(mut self, hops: u8) -> Self {
        self.hop_limit = hops;
        self
    }

    /// Random 20-bit flow label, as several OS probes send
    pub fn random_flow_label(mut self) -> Self {
        self.flow_label = rand::thread_rng().gen_range(0..1 << 20);
        self
    }

    pub fn next_header(mut self, protocol: u8) -> Self {
        self.next_header = protocol;
        self
    }

    pub fn extension(mut self, header: ExtensionHeader) -> Self {
        self.extensions.push(header);
        self
    }

    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let ext_len: usize = self.extensions.iter().map(|h| h.size()).sum();
        let payload_len = ext_len + self.payload.len();
        if payload_len > u16::MAX as usize {
            return Err(Error::Packet(format!("payload too large: {}", payload_len)));
        }
        let mut buffer = vec![0u8; 40 + payload_len];

        {
            let mut header = MutableIpv6Packet::new(&mut buffer[..40])
                .ok_or_else(|| Error::Packet("ipv6 header build failed".to_string()))?;
            header.set_version(6);
            header.set_traffic_class(0);
            header.set_flow_label(self.flow_label);
            header.set_payload_length(payload_len as u16);
            header.set_hop_limit(self.hop_limit);
            header.set_source(self.source);
            header.set_destination(self.destination);
            let first = self
                .extensions
                .first()
                .map(|h| h.header_type())
                .unwrap_or(self.next_header);
            header.set_next_header(IpNextHeaderProtocol::new(first));
        }

        let mut offset = 40;
        for (i, ext) in self.extensions.iter().enumerate() {
            let next = self
                .extensions
                .get(i + 1)
                .map(|h| h.header_type())
                .unwrap_or(self.next_header);
            let bytes = ext.build(next);
            buffer[offset..offset + bytes.len()].copy_from_slice(&bytes);
            offset += bytes.len();
        }
        buffer[offset..].copy_from_slice(&self.payload);

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (Ipv6Addr, Ipv6Addr) {
        ("2001:db8::1".parse().unwrap(), "2001:db8::2".parse().unwrap())
    }

    #[test]
    fn test_basic_packet() {
        let (src, dst) = addrs();
        let pkt = Ipv6Builder::new(src, dst)
            .hop_limit(7)
            .next_header(NEXT_TCP)
            .payload(vec![0xde, 0xad])
            .build()
            .unwrap();
        assert_eq!(pkt.len(), 42);
        assert_eq!(pkt[0] >> 4, 6);
        assert_eq!(pkt[6], NEXT_TCP);
        assert_eq!(pkt[7], 7);
        assert_eq!(u16::from_be_bytes([pkt[4], pkt[5]]), 2);
        assert_eq!(&pkt[8..24], &src.octets());
        assert_eq!(&pkt[24..40], &dst.octets());
    }

    #[test]
    fn test_extension_chain() {
        let (src, dst) = addrs();
        let pkt = Ipv6Builder::new(src, dst)
            .next_header(NEXT_ICMPV6)
            .extension(ExtensionHeader::HopByHop(ExtensionHeader::pad4()))
            .extension(ExtensionHeader::DestinationOptions(ExtensionHeader::pad4()))
            .extension(ExtensionHeader::Routing)
            .extension(ExtensionHeader::HopByHop(ExtensionHeader::pad4()))
            .payload(vec![0; 8])
            .build()
            .unwrap();
        // next-header chain: hbh -> dstopt -> routing -> hbh -> icmpv6
        assert_eq!(pkt[6], 0);
        assert_eq!(pkt[40], 60);
        assert_eq!(pkt[48], 43);
        assert_eq!(pkt[56], 0);
        assert_eq!(pkt[64], NEXT_ICMPV6);
        assert_eq!(pkt.len(), 40 + 4 * 8 + 8);
    }

    #[test]
    fn test_hbh_size_is_eight() {
        assert_eq!(
            ExtensionHeader::HopByHop(ExtensionHeader::pad4()).size(),
            8
        );
        assert_eq!(ExtensionHeader::Routing.size(), 8);
    }

    #[test]
    fn test_flow_label_in_range() {
        let (src, dst) = addrs();
        for _ in 0..16 {
            let pkt = Ipv6Builder::new(src, dst).random_flow_label().build().unwrap();
            let label =
                u32::from_be_bytes([0, pkt[1] & 0x0f, pkt[2], pkt[3]]);
            assert!(label < 1 << 20);
        }
    }
}
