//! Error types for the sixscan libraries

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias for sixscan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error cases shared by every sixscan crate
#[derive(Error, Debug)]
pub enum Error {
    /// Network-related errors (socket setup, capture open, send failures)
    #[error("network error: {0}")]
    Network(String),

    /// I/O errors with automatic conversion
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid target specification
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Invalid port or port range
    #[error("invalid port range: {0}")]
    InvalidPortRange(String),

    /// Configuration errors, reported at scanner construction
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed wire data
    #[error("packet error: {0}")]
    Packet(String),

    /// A scan finished without a usable response
    #[error("no response: {0}")]
    NoResponse(String),

    /// The PTR zone answers random names and cannot be crawled
    #[error("autogen zone detected")]
    AutogenZone,

    /// The DHCPv6 server assigns no addresses; pool location is impossible
    #[error("stateless dhcp detected")]
    StatelessDhcp,

    /// A stateless server advertised for every probed prefix
    #[error("stateless server responds to all prefixes")]
    RespondsToAllPrefixes,
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::InvalidTarget(format!("invalid IPv6 address: {}", err))
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(err: ipnetwork::IpNetworkError) -> Self {
        Error::InvalidTarget(format!("invalid IPv6 network: {}", err))
    }
}
