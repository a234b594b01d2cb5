//! sixscan core library
//!
//! Shared building blocks for the sixscan toolkit:
//!
//! - [`error`]: the crate-wide error enum and `Result` alias
//! - [`defaults`]: normative default constants
//! - [`config`]: typed scan configuration consumed by the scanners
//! - [`targets`]: address / port / address-port expansion
//! - [`types`]: structured scan results
//! - [`scale`]: DHCPv6 pool-scale classification and prefix search

pub mod config;
pub mod defaults;
pub mod error;
pub mod scale;
pub mod targets;
pub mod types;

pub use config::{ScanConfig, SweepRange, Timing};
pub use error::{Error, Result};
pub use scale::{select_plen, PoolScale, PrefixSearch, ScaleKind};
pub use targets::{expand_addr_ports, expand_addrs, expand_ports, resolve_host};
pub use types::{DhcpInfo, DhcpKind, HopReason, IaKind, PortState, TraceHop};
