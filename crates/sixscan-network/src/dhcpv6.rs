//! DHCPv6 wire codec (RFC 8415)
//!
//! Every sixscan probe wraps its client message in a single Relay-Forward so
//! the server treats the crafted source as a relay agent; responses arrive
//! as Relay-Reply envelopes carrying the nested Advertise or Reply. Only the
//! message shapes the scanners exchange are implemented.

use rand::Rng;
use sixscan_core::types::IaKind;
use sixscan_core::{Error, Result};
use std::net::Ipv6Addr;

pub const SERVER_PORT: u16 = 547;
pub const CLIENT_PORT: u16 = 546;

pub const MSG_SOLICIT: u8 = 1;
pub const MSG_ADVERTISE: u8 = 2;
pub const MSG_REPLY: u8 = 7;
pub const MSG_INFO_REQUEST: u8 = 11;
pub const MSG_RELAY_FORWARD: u8 = 12;
pub const MSG_RELAY_REPLY: u8 = 13;

pub const OPT_CLIENTID: u16 = 1;
pub const OPT_SERVERID: u16 = 2;
pub const OPT_IA_NA: u16 = 3;
pub const OPT_IA_TA: u16 = 4;
pub const OPT_IAADDR: u16 = 5;
pub const OPT_ORO: u16 = 6;
pub const OPT_ELAPSED_TIME: u16 = 8;
pub const OPT_RELAY_MSG: u16 = 9;
pub const OPT_IA_PD: u16 = 25;
pub const OPT_IAPREFIX: u16 = 26;

// Option codes requested in every Option-Request: DNS servers, domain list.
const ORO_OPTIONS: [u16; 2] = [23, 24];

/// DUID-LL client identifier (type 3, hardware type 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duid(Vec<u8>);

impl Duid {
    /// Fresh DUID-LL over a random 6-byte link-layer address.
    pub fn random_link_layer() -> Self {
        let mut lladdr = [0u8; 6];
        rand::thread_rng().fill(&mut lladdr);
        Self::link_layer(lladdr)
    }

    pub fn link_layer(lladdr: [u8; 6]) -> Self {
        let mut buf = Vec::with_capacity(10);
        buf.extend_from_slice(&3u16.to_be_bytes()); // DUID-LL
        buf.extend_from_slice(&1u16.to_be_bytes()); // hardware type: Ethernet
        buf.extend_from_slice(&lladdr);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn push_option(buf: &mut Vec<u8>, code: u16, data: &[u8]) {
    buf.extend_from_slice(&code.to_be_bytes());
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
}

fn push_header(buf: &mut Vec<u8>, msg_type: u8, trid: u32) {
    buf.push(msg_type);
    buf.extend_from_slice(&trid.to_be_bytes()[1..]);
}

fn oro_bytes() -> Vec<u8> {
    ORO_OPTIONS
        .iter()
        .flat_map(|code| code.to_be_bytes())
        .collect()
}

/// Solicit asking for one IA_NA, IA_TA and IA_PD with random IAIDs.
///
/// `trid` is masked to its 24 transaction-id bits.
pub fn build_solicit(duid: &Duid, trid: u32) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut buf = Vec::with_capacity(96);
    push_header(&mut buf, MSG_SOLICIT, trid & 0x00ff_ffff);
    push_option(&mut buf, OPT_CLIENTID, duid.as_bytes());
    push_option(&mut buf, OPT_ORO, &oro_bytes());
    push_option(&mut buf, OPT_ELAPSED_TIME, &0u16.to_be_bytes());

    let mut ia = [0u8; 12];
    ia[..4].copy_from_slice(&rng.gen::<u32>().to_be_bytes());
    push_option(&mut buf, OPT_IA_NA, &ia);
    push_option(&mut buf, OPT_IA_TA, &rng.gen::<u32>().to_be_bytes());
    ia[..4].copy_from_slice(&rng.gen::<u32>().to_be_bytes());
    push_option(&mut buf, OPT_IA_PD, &ia);
    buf
}

/// Information-Request carrying Client-ID and Option-Request.
pub fn build_info_request(duid: &Duid, trid: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    push_header(&mut buf, MSG_INFO_REQUEST, trid & 0x00ff_ffff);
    push_option(&mut buf, OPT_CLIENTID, duid.as_bytes());
    push_option(&mut buf, OPT_ORO, &oro_bytes());
    buf
}

/// Wrap a client message in a Relay-Forward with the given link address.
pub fn wrap_relay_forward(linkaddr: Ipv6Addr, message: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(34 + 4 + message.len());
    buf.push(MSG_RELAY_FORWARD);
    buf.push(0); // hop count
    buf.extend_from_slice(&linkaddr.octets());
    buf.extend_from_slice(&Ipv6Addr::UNSPECIFIED.octets()); // peer address
    push_option(&mut buf, OPT_RELAY_MSG, message);
    buf
}

fn parse_options(mut buf: &[u8]) -> Result<Vec<(u16, Vec<u8>)>> {
    let mut options = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 4 {
            return Err(Error::Packet("truncated dhcpv6 option header".to_string()));
        }
        let code = u16::from_be_bytes([buf[0], buf[1]]);
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Err(Error::Packet(format!("truncated dhcpv6 option {}", code)));
        }
        options.push((code, buf[4..4 + len].to_vec()));
        buf = &buf[4 + len..];
    }
    Ok(options)
}

/// A parsed client message plus its raw bytes
#[derive(Debug, Clone)]
pub struct DhcpMessage {
    pub msg_type: u8,
    pub trid: u32,
    pub options: Vec<(u16, Vec<u8>)>,
    pub raw: Vec<u8>,
}

impl DhcpMessage {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::Packet("dhcpv6 message too short".to_string()));
        }
        Ok(Self {
            msg_type: buf[0],
            trid: u32::from_be_bytes([0, buf[1], buf[2], buf[3]]),
            options: parse_options(&buf[4..])?,
            raw: buf.to_vec(),
        })
    }

    pub fn is_advertise(&self) -> bool {
        self.msg_type == MSG_ADVERTISE
    }

    pub fn is_reply(&self) -> bool {
        self.msg_type == MSG_REPLY
    }

    pub fn has_server_id(&self) -> bool {
        self.option(OPT_SERVERID).is_some()
    }

    pub fn option(&self, code: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, data)| data.as_slice())
    }

    /// First assigned address or delegated prefix of the given IA family.
    pub fn ia_addr(&self, kind: IaKind) -> Option<Ipv6Addr> {
        let (code, skip, sub_code, addr_offset) = match kind {
            // IA_NA: iaid + T1 + T2, then sub-options
            IaKind::Na => (OPT_IA_NA, 12, OPT_IAADDR, 0),
            // IA_TA: iaid only
            IaKind::Ta => (OPT_IA_TA, 4, OPT_IAADDR, 0),
            // IAPrefix: preferred + valid lifetime + prefix length, then prefix
            IaKind::Pd => (OPT_IA_PD, 12, OPT_IAPREFIX, 9),
        };
        let body = self.option(code)?;
        if body.len() < skip {
            return None;
        }
        let subs = parse_options(&body[skip..]).ok()?;
        for (c, data) in subs {
            if c == sub_code && data.len() >= addr_offset + 16 {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[addr_offset..addr_offset + 16]);
                return Some(Ipv6Addr::from(octets));
            }
        }
        None
    }

    /// True when any IA family carries an assignment.
    pub fn has_any_ia(&self) -> bool {
        IaKind::ALL.iter().any(|kind| self.ia_addr(*kind).is_some())
    }
}

/// Unwrap a Relay-Reply and parse the nested client message.
pub fn parse_relay_reply(buf: &[u8]) -> Result<DhcpMessage> {
    if buf.len() < 34 {
        return Err(Error::Packet("relay message too short".to_string()));
    }
    if buf[0] != MSG_RELAY_REPLY {
        return Err(Error::Packet(format!(
            "not a relay-reply: message type {}",
            buf[0]
        )));
    }
    let options = parse_options(&buf[34..])?;
    let relay_msg = options
        .into_iter()
        .find(|(code, _)| *code == OPT_RELAY_MSG)
        .map(|(_, data)| data)
        .ok_or_else(|| Error::Packet("relay-reply without relay message".to_string()))?;
    DhcpMessage::parse(&relay_msg)
}

/// Link address recorded in a relay envelope, used by tests and diagnostics.
pub fn relay_linkaddr(buf: &[u8]) -> Option<Ipv6Addr> {
    if buf.len() < 34 || (buf[0] != MSG_RELAY_FORWARD && buf[0] != MSG_RELAY_REPLY) {
        return None;
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&buf[2..18]);
    Some(Ipv6Addr::from(octets))
}
