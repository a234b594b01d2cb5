//! Recursive PTR-zone traversal under `ip6.arpa.`
//!
//! Depth-first descent over the sixteen nibbles, pruning on anything but
//! NOERROR. An optional pre-check sends sixteen random full-length names;
//! a zone answering four or more of them is treated as auto-generated and
//! refused. Queries go over UDP with a per-query `timewait` timeout, or TCP
//! on request.

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use rand::Rng;
use sixscan_core::defaults::SUFFIX;
use sixscan_core::{Error, Result};
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;
use tracing::debug;

const NIBBLES: &str = "0123456789abcdef";
const AUTOGEN_PROBES: usize = 16;
const AUTOGEN_THRESHOLD: usize = 4;
// An autogen probe keeps at most 64 nibble characters before the suffix.
const AUTOGEN_KEEP: usize = 64 + SUFFIX.len();

pub struct DnsScanner {
    basename: String,
    nameserver: SocketAddr,
    /// Character limit: `nibble_limit` levels below the base name
    limit: usize,
    no_recursive: bool,
    skip_check_autogen: bool,
    via_tcp: bool,
    timewait: Duration,
}

impl DnsScanner {
    pub fn new(
        basename: &str,
        nameserver: Option<IpAddr>,
        nibble_limit: u8,
        no_recursive: bool,
        skip_check_autogen: bool,
        via_tcp: bool,
        timewait: Duration,
    ) -> Result<Self> {
        if !basename.ends_with(SUFFIX) {
            return Err(Error::Config(format!("invalid base name: {}", basename)));
        }
        if nibble_limit == 0 || nibble_limit > 16 {
            return Err(Error::Config(format!(
                "nibble limit {} outside 1..=16",
                nibble_limit
            )));
        }
        let nameserver = match nameserver {
            Some(addr) => addr,
            None => system_nameserver()?,
        };
        Ok(Self {
            basename: basename.to_string(),
            nameserver: SocketAddr::new(nameserver, 53),
            limit: 2 * nibble_limit as usize + basename.len(),
            no_recursive,
            skip_check_autogen,
            via_tcp,
            timewait,
        })
    }

    /// Crawl the zone and return every full-length name that resolves.
    pub fn scan(&self) -> Result<Vec<String>> {
        if !self.skip_check_autogen && self.check_autogen() {
            return Err(Error::AutogenZone);
        }
        let mut results = Vec::new();
        let mut query = |name: &str| self.query_noerror(name);
        traverse(&self.basename, self.limit, &mut query, &mut results);
        Ok(results)
    }

    fn check_autogen(&self) -> bool {
        let mut hits = 0;
        for _ in 0..AUTOGEN_PROBES {
            let name = autogen_probe_name(&self.basename);
            if self.query_noerror(&name) {
                hits += 1;
                if hits >= AUTOGEN_THRESHOLD {
                    return true;
                }
            }
        }
        false
    }

    fn query_noerror(&self, name: &str) -> bool {
        match self.query(name) {
            Ok(rcode) => rcode == ResponseCode::NoError,
            Err(e) => {
                debug!("query {} failed: {}", name, e);
                false
            }
        }
    }

    fn query(&self, name: &str) -> Result<ResponseCode> {
        let name = Name::from_ascii(name)
            .map_err(|e| Error::Config(format!("invalid query name {:?}: {}", name, e)))?;
        let id: u16 = rand::thread_rng().gen();
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(!self.no_recursive)
            .add_query(Query::query(name, RecordType::PTR));
        let request = message
            .to_vec()
            .map_err(|e| Error::Packet(format!("dns encode: {}", e)))?;

        let response = if self.via_tcp {
            self.exchange_tcp(&request)?
        } else {
            self.exchange_udp(&request)?
        };
        let message = Message::from_vec(&response)
            .map_err(|e| Error::Packet(format!("dns decode: {}", e)))?;
        if message.id() != id {
            return Err(Error::Packet("dns response id mismatch".to_string()));
        }
        Ok(message.response_code())
    }

    fn exchange_udp(&self, request: &[u8]) -> Result<Vec<u8>> {
        let bind = if self.nameserver.is_ipv6() {
            SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(self.timewait))?;
        socket.send_to(request, self.nameserver)?;
        let mut buf = [0u8; 4096];
        let (len, _) = socket.recv_from(&mut buf)?;
        Ok(buf[..len].to_vec())
    }

    fn exchange_tcp(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut stream = TcpStream::connect_timeout(&self.nameserver, self.timewait)?;
        stream.set_read_timeout(Some(self.timewait))?;
        stream.set_write_timeout(Some(self.timewait))?;
        stream.write_all(&(request.len() as u16).to_be_bytes())?;
        stream.write_all(request)?;
        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf)?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Depth-first nibble descent; prune on over-length or a non-NOERROR answer,
/// record names that reach exactly the character limit.
fn traverse(
    name: &str,
    limit: usize,
    query: &mut impl FnMut(&str) -> bool,
    results: &mut Vec<String>,
) {
    if name.len() > limit || !query(name) {
        return;
    }
    if name.len() == limit {
        results.push(name.to_string());
        return;
    }
    for nibble in NIBBLES.chars() {
        traverse(&format!("{}.{}", nibble, name), limit, query, results);
    }
}

/// Random full-length probe name for the autogen pre-check, truncated to its
/// trailing 64 nibble labels plus the base name's suffix.
fn autogen_probe_name(basename: &str) -> String {
    let mut rng = rand::thread_rng();
    let nibbles: Vec<String> = (0..32)
        .map(|_| format!("{:x}", rng.gen_range(0..16)))
        .collect();
    let name = format!("{}.{}", nibbles.join("."), basename);
    let keep = name.len().min(AUTOGEN_KEEP);
    name[name.len() - keep..].to_string()
}

fn system_nameserver() -> Result<IpAddr> {
    let (config, _) = hickory_resolver::system_conf::read_system_conf()
        .map_err(|e| Error::Config(format!("cannot read resolver configuration: {}", e)))?;
    config
        .name_servers()
        .first()
        .map(|ns| ns.socket_addr.ip())
        .ok_or_else(|| Error::Config("no system nameserver configured".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traverse_scenario() {
        // Server answers NOERROR for the base name and one leaf.
        let base = "0.0.8.b.d.0.1.0.0.2.ip6.arpa.";
        let good = "5.0.0.8.b.d.0.1.0.0.2.ip6.arpa.";
        let limit = 2 + base.len();
        let mut queries = Vec::new();
        let mut results = Vec::new();
        let mut query = |name: &str| {
            queries.push(name.to_string());
            name == base || name == good
        };
        traverse(base, limit, &mut query, &mut results);
        assert_eq!(results, vec![good.to_string()]);
        // Base plus one query per nibble; nothing recursed past the limit.
        assert_eq!(queries.len(), 17);
    }

    #[test]
    fn test_traverse_prunes_dead_branches() {
        let base = "ip6.arpa.";
        let limit = 4 + base.len();
        let mut queries = 0usize;
        let mut results = Vec::new();
        let mut query = |_: &str| {
            queries += 1;
            false
        };
        traverse(base, limit, &mut query, &mut results);
        assert!(results.is_empty());
        assert_eq!(queries, 1);
    }

    #[test]
    fn test_traverse_result_shape() {
        let base = SUFFIX;
        let nibble_limit = 2usize;
        let limit = 2 * nibble_limit + SUFFIX.len();
        let mut results = Vec::new();
        let mut query = |_: &str| true;
        traverse(base, limit, &mut query, &mut results);
        assert_eq!(results.len(), 256);
        for name in &results {
            assert_eq!(name.len(), limit);
            assert!(name.ends_with(SUFFIX));
            let labels: Vec<&str> = name.split('.').collect();
            assert!(labels[..nibble_limit]
                .iter()
                .all(|l| l.len() == 1 && l.chars().all(|c| c.is_ascii_hexdigit())));
        }
    }

    #[test]
    fn test_autogen_probe_name_shape() {
        let base = "0.0.8.b.d.0.1.0.0.2.ip6.arpa.";
        for _ in 0..8 {
            let name = autogen_probe_name(base);
            assert!(name.len() <= AUTOGEN_KEEP);
            assert!(name.ends_with("ip6.arpa."));
        }
    }

    #[test]
    fn test_basename_must_end_with_suffix() {
        let err = DnsScanner::new(
            "example.com.",
            Some("2001:db8::53".parse().unwrap()),
            4,
            false,
            false,
            false,
            Duration::from_secs(1),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_nibble_limit_bounds() {
        for (limit, ok) in [(0u8, false), (1, true), (16, true), (17, false)] {
            let scanner = DnsScanner::new(
                SUFFIX,
                Some("2001:db8::53".parse().unwrap()),
                limit,
                false,
                false,
                false,
                Duration::from_secs(1),
            );
            assert_eq!(scanner.is_ok(), ok, "limit {}", limit);
        }
    }

    #[test]
    fn test_char_limit_formula() {
        let scanner = DnsScanner::new(
            SUFFIX,
            Some("2001:db8::53".parse().unwrap()),
            4,
            false,
            false,
            false,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(scanner.limit, 2 * 4 + SUFFIX.len());

        // Deeper base names explore the same number of levels below them.
        let base = "0.0.8.b.d.0.1.0.0.2.ip6.arpa.";
        let scanner = DnsScanner::new(
            base,
            Some("2001:db8::53".parse().unwrap()),
            1,
            false,
            false,
            false,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(scanner.limit, base.len() + 2);
    }
}
