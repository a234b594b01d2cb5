//! Normative default constants

/// Retry rounds for stateful probing
pub const RETRY: usize = 2;

/// Quiescence after each probe batch, in seconds
pub const TIMEWAIT: f64 = 1.0;

/// Spacing between consecutive probes, in seconds
pub const INTERVAL: f64 = 0.1;

/// Cap on the expanded target set unless explicitly disabled
pub const MAX_TARGETS: usize = 65536;

/// Maximum hop limit probed by the traceroute scanners
pub const TRACEROUTE_LIMIT: u8 = 16;

/// First hop probed by a traceroute
pub const TRACEROUTE_HOP: u8 = 1;

/// Nibbles explored below a PTR-zone base name
pub const DNS_LIMIT: u8 = 4;

/// Solicits sent by the DHCPv6 scaler
pub const DHCP_SCALE_COUNT: usize = 64;

/// Minimal answer ratio for a pool-scale classification
pub const DHCP_SCALE_LOSSRATE: f64 = 0.5;

/// Prefix-length step used by DHCPv6 subnet walking
pub const DHCP_LOCATE_STEP: u8 = 4;

/// Sub-subnets recorded before per-subnet scaling is skipped
pub const DHCP_ENUM_LIMIT: usize = 32;

/// Reverse-DNS suffix for IPv6 PTR zones
pub const SUFFIX: &str = "ip6.arpa.";

// From nmap/portlist.cc::random_port_cheat::pop_ports.
pub const POP_PORTS: &str = "80,23,443,21,22,25,3389,110,445,139,\
143,53,135,3306,8080,1723,111,995,993,5900,1025,587,8888,199,1720";
