//! Structured scan results

use crate::scale::PoolScale;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv6Addr;

/// State of a TCP port as observed by the SYN scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
        }
    }
}

/// Why a traceroute reply counts as arrival or an intermediate hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopReason {
    Arrived,
    TimeExceeded,
    DestRoute,
    DestProhibited,
    DestAddr,
    DestPort,
    DestUnknown,
}

impl HopReason {
    /// Map a Destination-Unreachable code; all of these mean the probe made
    /// it to the destination network.
    pub fn from_unreach_code(code: u8) -> Self {
        match code {
            0 => HopReason::DestRoute,
            1 => HopReason::DestProhibited,
            3 => HopReason::DestAddr,
            4 => HopReason::DestPort,
            _ => HopReason::DestUnknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HopReason::Arrived => "arrived",
            HopReason::TimeExceeded => "time exceeded",
            HopReason::DestRoute => "dest route",
            HopReason::DestProhibited => "dest prohibited",
            HopReason::DestAddr => "dest addr",
            HopReason::DestPort => "dest port",
            HopReason::DestUnknown => "dest unknown",
        }
    }

    /// Dest-Unreachable carries an arrival-with-reason; Time-Exceeded does not.
    pub fn arrived(&self) -> bool {
        !matches!(self, HopReason::TimeExceeded)
    }
}

impl fmt::Display for HopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One traceroute hop; `addr`/`reason` stay empty when every retry timed out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceHop {
    pub hop: u8,
    pub addr: Option<Ipv6Addr>,
    pub reason: Option<HopReason>,
    pub arrived: bool,
}

impl TraceHop {
    pub fn answered(hop: u8, addr: Ipv6Addr, reason: HopReason) -> Self {
        Self {
            hop,
            addr: Some(addr),
            reason: Some(reason),
            arrived: reason.arrived(),
        }
    }

    pub fn unanswered(hop: u8) -> Self {
        Self {
            hop,
            addr: None,
            reason: None,
            arrived: false,
        }
    }
}

/// DHCPv6 identity-association families
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IaKind {
    Na,
    Ta,
    Pd,
}

impl IaKind {
    pub const ALL: [IaKind; 3] = [IaKind::Na, IaKind::Ta, IaKind::Pd];

    pub fn as_str(&self) -> &'static str {
        match self {
            IaKind::Na => "na",
            IaKind::Ta => "ta",
            IaKind::Pd => "pd",
        }
    }
}

impl fmt::Display for IaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the probed server hands out addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhcpKind {
    Stateful,
    Stateless,
}

impl DhcpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DhcpKind::Stateful => "stateful",
            DhcpKind::Stateless => "stateless",
        }
    }
}

/// Per-family pool scales of one enumerated sub-subnet
pub type SubnetScales = BTreeMap<IaKind, Option<PoolScale>>;

/// Aggregate result of the top-level DHCPv6 scan
#[derive(Debug, Clone)]
pub struct DhcpInfo {
    pub target: Ipv6Addr,
    pub linkaddr: Ipv6Addr,
    pub plen: u8,
    /// Raw Reply message answering the Information-Request
    pub reply: Vec<u8>,
    /// Raw Advertise message answering the Solicit
    pub advertise: Vec<u8>,
    pub kind: DhcpKind,
    /// Enumerated sub-subnets; `None` per-subnet when scaling was skipped
    pub subnets: BTreeMap<Ipv6Addr, Option<SubnetScales>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_state_text() {
        assert_eq!(PortState::Open.to_string(), "open");
        assert_eq!(
            serde_json::to_string(&PortState::Filtered).unwrap(),
            "\"filtered\""
        );
    }

    #[test]
    fn test_unreach_codes() {
        assert_eq!(HopReason::from_unreach_code(0), HopReason::DestRoute);
        assert_eq!(HopReason::from_unreach_code(1), HopReason::DestProhibited);
        assert_eq!(HopReason::from_unreach_code(3), HopReason::DestAddr);
        assert_eq!(HopReason::from_unreach_code(4), HopReason::DestPort);
        assert_eq!(HopReason::from_unreach_code(7), HopReason::DestUnknown);
        assert!(HopReason::from_unreach_code(4).arrived());
        assert!(!HopReason::TimeExceeded.arrived());
    }

    #[test]
    fn test_trace_hop() {
        let hop = TraceHop::answered(3, "fe80::1".parse().unwrap(), HopReason::TimeExceeded);
        assert!(!hop.arrived);
        let hop = TraceHop::answered(4, "2001:db8::1".parse().unwrap(), HopReason::Arrived);
        assert!(hop.arrived);
        let hop = TraceHop::unanswered(5);
        assert!(hop.addr.is_none() && !hop.arrived);
    }
}
