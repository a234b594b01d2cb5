//! sixscan network layer
//!
//! This crate is the only boundary against wire formats and sockets:
//!
//! - [`transport`]: the `Transport` capability consumed by the probe engine
//! - [`dgram`]: raw ICMPv6 / bound UDP sockets with non-blocking receive
//! - [`capture`]: raw IPv6 send plus BPF-filtered live capture
//! - [`icmp6_filter`]: the 256-bit kernel ICMPv6 type filter
//! - [`interface`]: capture interface and source-address discovery
//! - [`icmpv6`], [`tcp6`], [`udp6`], [`ipv6`], [`dhcpv6`]: the packet codec

pub mod capture;
pub mod dgram;
pub mod dhcpv6;
pub mod icmp6_filter;
pub mod icmpv6;
pub mod interface;
pub mod ipv6;
pub mod tcp6;
pub mod transport;
pub mod udp6;

pub use capture::{CaptureTransport, FilterTemplate};
pub use dgram::{DgramProbe, DgramReply, DgramTransport};
pub use icmp6_filter::Icmp6Filter;
pub use transport::{ReplyFilter, Transport};
