//! ICMPv6 packet construction and parsing (RFC 4443)
//!
//! Two build paths: the datagram path leaves the checksum zero (the kernel
//! fills it on raw ICMPv6 sockets), the capture path computes the full
//! pseudo-header checksum since the packet bypasses the ICMPv6 stack.

use rand::Rng;
use sixscan_core::{Error, Result};
use std::net::Ipv6Addr;

pub use crate::icmp6_filter::{
    ICMP6_DEST_UNREACH, ICMP6_ECHO_REPLY, ICMP6_ECHO_REQUEST, ICMP6_PARAM_PROB,
    ICMP6_TIME_EXCEEDED,
};

/// Echo payload of 20–40 random bytes, as the host scan and OS probes use
pub fn random_payload() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(20..=40);
    (0..len).map(|_| rng.gen()).collect()
}

/// Echo Request with a zero checksum, for raw ICMPv6 sockets.
pub fn echo_request(identifier: u16, sequence: u16, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + data.len());
    buf.push(ICMP6_ECHO_REQUEST);
    buf.push(0); // code
    buf.extend_from_slice(&[0, 0]); // checksum, kernel-computed
    buf.extend_from_slice(&identifier.to_be_bytes());
    buf.extend_from_slice(&sequence.to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Checksummed ICMPv6 message for the capture path.
///
/// `body` is everything after the 4-byte type/code/checksum header; for an
/// echo that is identifier, sequence and data.
pub fn message(src: Ipv6Addr, dst: Ipv6Addr, ty: u8, code: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.push(ty);
    buf.push(code);
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(body);
    let checksum = pseudo_checksum(&buf, src, dst);
    buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// Checksummed Echo Request, optionally with a non-zero code (IE1 probes).
pub fn echo_request_packet(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    code: u8,
    identifier: u16,
    sequence: u16,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + data.len());
    body.extend_from_slice(&identifier.to_be_bytes());
    body.extend_from_slice(&sequence.to_be_bytes());
    body.extend_from_slice(data);
    message(src, dst, ICMP6_ECHO_REQUEST, code, &body)
}

/// ICMPv6 checksum over the 40-byte IPv6 pseudo-header plus the message
fn pseudo_checksum(icmp: &[u8], src: Ipv6Addr, dst: Ipv6Addr) -> u16 {
    let mut data = Vec::with_capacity(40 + icmp.len());
    data.extend_from_slice(&src.octets());
    data.extend_from_slice(&dst.octets());
    data.extend_from_slice(&(icmp.len() as u32).to_be_bytes());
    data.extend_from_slice(&[0, 0, 0]);
    data.push(58); // next header: ICMPv6
    data.extend_from_slice(icmp);
    pnet::util::checksum(&data, 1)
}

/// Type and code of a raw ICMPv6 message
pub fn type_code(buf: &[u8]) -> Option<(u8, u8)> {
    if buf.len() < 8 {
        return None;
    }
    Some((buf[0], buf[1]))
}

/// Identifier and sequence of an Echo Reply
pub fn parse_echo_reply(buf: &[u8]) -> Option<(u16, u16)> {
    let (ty, _) = type_code(buf)?;
    if ty != ICMP6_ECHO_REPLY {
        return None;
    }
    Some((
        u16::from_be_bytes([buf[4], buf[5]]),
        u16::from_be_bytes([buf[6], buf[7]]),
    ))
}

/// Invoking IPv6 packet carried by a Time-Exceeded / Dest-Unreachable /
/// Parameter-Problem message (4-byte header, 4 unused bytes, inner packet).
pub fn invoking_packet(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < 48 {
        return Err(Error::Packet("icmpv6 error message too short".to_string()));
    }
    Ok(&buf[8..])
}

/// Destination of the invoking packet inside an ICMPv6 error message
pub fn invoking_dest(buf: &[u8]) -> Option<Ipv6Addr> {
    let inner = invoking_packet(buf).ok()?;
    if inner.len() < 40 || inner[0] >> 4 != 6 {
        return None;
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&inner[24..40]);
    Some(Ipv6Addr::from(octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_request_layout() {
        let pkt = echo_request(0xbeef, 7, &[0xaa; 24]);
        assert_eq!(pkt.len(), 8 + 24);
        assert_eq!(pkt[0], 128);
        assert_eq!(pkt[1], 0);
        assert_eq!(&pkt[2..4], &[0, 0]);
        assert_eq!(u16::from_be_bytes([pkt[4], pkt[5]]), 0xbeef);
        assert_eq!(u16::from_be_bytes([pkt[6], pkt[7]]), 7);
    }

    #[test]
    fn test_echo_reply_roundtrip() {
        let mut pkt = echo_request(0x1234, 42, &[1, 2, 3, 4]);
        pkt[0] = ICMP6_ECHO_REPLY;
        let (ident, seq) = parse_echo_reply(&pkt).unwrap();
        assert_eq!(ident, 0x1234);
        assert_eq!(seq, 42);
        assert!(parse_echo_reply(&pkt[..6]).is_none());
    }

    #[test]
    fn test_checksummed_packet() {
        let src = "2001:db8::1".parse().unwrap();
        let dst = "2001:db8::2".parse().unwrap();
        let pkt = echo_request_packet(src, dst, 0, 1, 2, &[0xde, 0xad]);
        let checksum = u16::from_be_bytes([pkt[2], pkt[3]]);
        assert_ne!(checksum, 0);

        // A different source changes the pseudo-header and the checksum.
        let other = echo_request_packet("2001:db8::ff".parse().unwrap(), dst, 0, 1, 2, &[0xde, 0xad]);
        assert_ne!(
            checksum,
            u16::from_be_bytes([other[2], other[3]])
        );
    }

    #[test]
    fn test_invoking_dest() {
        let target: Ipv6Addr = "2001:db8::42".parse().unwrap();
        let mut inner = vec![0u8; 40];
        inner[0] = 0x60;
        inner[24..40].copy_from_slice(&target.octets());
        let mut err = vec![ICMP6_TIME_EXCEEDED, 0, 0, 0, 0, 0, 0, 0];
        err.extend_from_slice(&inner);
        assert_eq!(invoking_dest(&err), Some(target));
        assert!(invoking_packet(&err[..20]).is_err());
    }

    #[test]
    fn test_random_payload_bounds() {
        for _ in 0..32 {
            let len = random_payload().len();
            assert!((20..=40).contains(&len));
        }
    }
}
