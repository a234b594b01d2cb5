//! Typed scan configuration
//!
//! The CLI layer parses flags into a [`ScanConfig`]; each scanner consumes
//! only the subset it recognizes.

use crate::defaults;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Send-loop timing shared by every scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    /// Retry rounds for stateful probing
    pub retry: usize,
    /// Quiescence after each batch
    pub timewait: Duration,
    /// Spacing between consecutive probes
    pub interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry: defaults::RETRY,
            timewait: Duration::from_secs_f64(defaults::TIMEWAIT),
            interval: Duration::from_secs_f64(defaults::INTERVAL),
        }
    }
}

/// Prefix-length sweep used by the stateless DHCPv6 dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepRange {
    /// First prefix length probed (inclusive)
    pub beg: u8,
    /// End of the swept range (exclusive)
    pub end: u8,
    /// Step between probed prefix lengths; also the enumeration diff
    pub step: u8,
}

impl SweepRange {
    pub fn new(beg: u8, end: u8, step: u8) -> Result<Self> {
        if beg >= end || end > 128 || step == 0 {
            return Err(Error::Config(format!(
                "invalid prefix sweep {}..{} step {}",
                beg, end, step
            )));
        }
        Ok(Self { beg, end, step })
    }

    /// Prefix lengths visited by the sweep
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (self.beg..self.end).step_by(self.step as usize)
    }
}

impl Default for SweepRange {
    fn default() -> Self {
        Self {
            beg: 32,
            end: 96,
            step: defaults::DHCP_LOCATE_STEP,
        }
    }
}

/// Union of the options recognized across all scanners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub timing: Timing,
    /// Capture interface; `None` selects the first usable one
    pub iface: Option<String>,
    /// Port answering SYN with SYN/ACK, for OS probes expecting an open port
    pub open_port: Option<u16>,
    /// Port answering SYN with RST, for OS probes expecting a closed port
    pub closed_port: Option<u16>,
    /// Hop / nibble / subnet-count limit depending on the scanner
    pub limit: Option<u64>,
    /// Prefix-length step for DHCPv6 walking
    pub step: u8,
    /// Solicit count for the DHCPv6 scaler
    pub count: usize,
    /// Minimal answer ratio for pool-scale classification
    pub lossrate: f64,
    /// First traceroute hop
    pub hop: u8,
    /// Prefix length handed to the DHCPv6 enumerator
    pub plen: Option<u8>,
    /// Sub-subnet size exponent for enumeration
    pub diff: Option<u8>,
    /// Stateless DHCPv6 prefix sweep
    pub sweep: SweepRange,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            iface: None,
            open_port: None,
            closed_port: None,
            limit: None,
            step: defaults::DHCP_LOCATE_STEP,
            count: defaults::DHCP_SCALE_COUNT,
            lossrate: defaults::DHCP_SCALE_LOSSRATE,
            hop: defaults::TRACEROUTE_HOP,
            plen: None,
            diff: None,
            sweep: SweepRange::default(),
        }
    }
}

impl ScanConfig {
    /// Validate the cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.timing.retry == 0 {
            return Err(Error::Config("retry must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.lossrate) {
            return Err(Error::Config(format!(
                "lossrate {} outside 0..=1",
                self.lossrate
            )));
        }
        if let Some(plen) = self.plen {
            if plen > 128 {
                return Err(Error::Config(format!("prefix length {} > 128", plen)));
            }
        }
        Ok(())
    }
}
