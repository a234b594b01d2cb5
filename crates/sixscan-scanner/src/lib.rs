//! sixscan scanning engine
//!
//! The [`engine`] module drives concurrent, retryable, rate-limited probing
//! over a [`sixscan_network::Transport`]; the remaining modules are the six
//! scanners built on it:
//!
//! - [`host`]: ICMPv6 echo sweep
//! - [`port`]: TCP SYN port scan
//! - [`trace`]: hop-by-hop traceroute (ICMP / DNS / SYN / DHCP variants)
//! - [`os`]: Nmap-style OS fingerprint probes
//! - [`dns`]: recursive PTR-zone traversal
//! - [`dhcp`]: DHCPv6 ping / scale / locate / enumerate and the top-level
//!   orchestrator

pub mod dhcp;
pub mod dns;
pub mod engine;
pub mod host;
pub mod os;
pub mod port;
pub mod trace;

pub use dhcp::DhcpScanner;
pub use dns::DnsScanner;
pub use engine::{Drive, ScanDriver};
pub use host::HostScanner;
pub use os::OsScanner;
pub use port::PortScanner;
pub use trace::{RouteTracer, TraceVariant};
