//! UDP datagram construction over IPv6

use pnet::packet::udp::{ipv6_checksum, MutableUdpPacket};
use sixscan_core::{Error, Result};
use std::net::Ipv6Addr;

/// Serialize a UDP datagram with its IPv6 checksum.
pub fn datagram(
    source: Ipv6Addr,
    destination: Ipv6Addr,
    source_port: u16,
    dest_port: u16,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let len = 8 + payload.len();
    if len > u16::MAX as usize {
        return Err(Error::Packet(format!("udp payload too large: {}", len)));
    }
    let mut buffer = vec![0u8; len];
    {
        let mut udp = MutableUdpPacket::new(&mut buffer)
            .ok_or_else(|| Error::Packet("udp header build failed".to_string()))?;
        udp.set_source(source_port);
        udp.set_destination(dest_port);
        udp.set_length(len as u16);
        udp.set_payload(payload);
        udp.set_checksum(0);
        let checksum = ipv6_checksum(&udp.to_immutable(), &source, &destination);
        udp.set_checksum(checksum);
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_layout() {
        let src = "2001:db8::1".parse().unwrap();
        let dst = "2001:db8::2".parse().unwrap();
        let pkt = datagram(src, dst, 547, 547, &[0xab; 12]).unwrap();
        assert_eq!(pkt.len(), 20);
        assert_eq!(u16::from_be_bytes([pkt[0], pkt[1]]), 547);
        assert_eq!(u16::from_be_bytes([pkt[2], pkt[3]]), 547);
        assert_eq!(u16::from_be_bytes([pkt[4], pkt[5]]), 20);
        assert_ne!(u16::from_be_bytes([pkt[6], pkt[7]]), 0);
        assert_eq!(&pkt[8..], &[0xab; 12]);
    }
}
