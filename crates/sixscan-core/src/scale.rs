//! DHCPv6 pool-structure inference
//!
//! [`PoolScale`] summarizes a sequence of server-assigned addresses as
//! `static`, `linear` (arithmetic progression) or `random`, and derives the
//! acceptance interval used by the prefix locator. [`PrefixSearch`] is the
//! binary-search state machine over prefix lengths, and [`select_plen`]
//! implements the stateless-server tie-break.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Structural kind of an address pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    Static,
    Linear,
    Random,
}

impl ScaleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleKind::Static => "static",
            ScaleKind::Linear => "linear",
            ScaleKind::Random => "random",
        }
    }
}

/// Structural summary of a DHCPv6 address pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolScale {
    #[serde(rename = "t")]
    pub kind: ScaleKind,
    pub a1: u128,
    pub a2: u128,
    /// Assignment step; signed, 0 for static pools. The sign records the
    /// direction of a linear pool and must not be normalized away.
    pub d: i128,
}

impl PoolScale {
    /// Classify a receipt-ordered sequence of assigned addresses.
    ///
    /// Returns `None` for an empty sequence. A single address classifies as
    /// static. A ≥90% majority of same-signed differences classifies as
    /// linear with the ceiled mean of the majority sign, provided any
    /// minority difference stays under twice that mean in magnitude.
    pub fn classify(addrs: &[u128]) -> Option<Self> {
        if addrs.is_empty() {
            return None;
        }
        let first = addrs[0];
        let last = addrs[addrs.len() - 1];
        let diffs: Vec<i128> = addrs
            .windows(2)
            .map(|w| w[1] as i128 - w[0] as i128)
            .collect();
        let poses: Vec<i128> = diffs.iter().copied().filter(|d| *d > 0).collect();
        let negs: Vec<i128> = diffs.iter().copied().filter(|d| *d < 0).collect();

        if poses.is_empty() && negs.is_empty() {
            return Some(Self {
                kind: ScaleKind::Static,
                a1: first,
                a2: last,
                d: 0,
            });
        }

        if poses.len() as f64 >= 0.9 * diffs.len() as f64 {
            let avg = poses.iter().sum::<i128>() as f64 / poses.len() as f64;
            let min_neg = negs.iter().min().copied().unwrap_or(0);
            if negs.is_empty() || (min_neg.unsigned_abs() as f64) < 2.0 * avg {
                return Some(Self {
                    kind: ScaleKind::Linear,
                    a1: first,
                    a2: last,
                    d: avg.ceil() as i128,
                });
            }
        }

        if negs.len() as f64 >= 0.9 * diffs.len() as f64 {
            let avg = negs.iter().sum::<i128>() as f64 / negs.len() as f64;
            let max_pos = poses.iter().max().copied().unwrap_or(0);
            if poses.is_empty() || (max_pos as f64) < 2.0 * avg.abs() {
                return Some(Self {
                    kind: ScaleKind::Linear,
                    a1: first,
                    a2: last,
                    d: avg.ceil() as i128,
                });
            }
        }

        let a1 = addrs.iter().min().copied().unwrap_or(first);
        let a2 = addrs.iter().max().copied().unwrap_or(last);
        let span = (a2 - a1) as f64 / (addrs.len() - 1) as f64;
        Some(Self {
            kind: ScaleKind::Random,
            a1,
            a2,
            d: span.ceil() as i128,
        })
    }

    /// Interval of addresses the locator treats as served by this pool.
    pub fn accept_range(&self) -> (u128, u128) {
        match self.kind {
            ScaleKind::Static => (self.a1, self.a2),
            ScaleKind::Linear => {
                if self.d > 0 {
                    let width = (self.d as u128).saturating_mul(128);
                    (self.a2, self.a2.saturating_add(width))
                } else {
                    let width = self.d.unsigned_abs().saturating_mul(128);
                    (self.a1.saturating_sub(width), self.a1)
                }
            }
            ScaleKind::Random => {
                let pad = self.d.unsigned_abs().saturating_mul(2);
                (self.a1.saturating_sub(pad), self.a2.saturating_add(pad))
            }
        }
    }

    pub fn accepts(&self, addr: u128) -> bool {
        let (lo, hi) = self.accept_range();
        lo <= addr && addr <= hi
    }
}

/// Binary search over served prefix lengths in `[0, 128]`.
///
/// Acceptance at the midpoint means the served prefix is at most `mid`, so
/// the search narrows right; a miss narrows left. The converged value is
/// `end`.
#[derive(Debug, Clone, Copy)]
pub struct PrefixSearch {
    beg: u8,
    end: u8,
}

impl PrefixSearch {
    pub fn new() -> Self {
        Self { beg: 0, end: 128 }
    }

    pub fn done(&self) -> bool {
        self.beg >= self.end
    }

    pub fn mid(&self) -> u8 {
        (self.beg + self.end) / 2
    }

    pub fn note(&mut self, accepted: bool) {
        let mid = self.mid();
        if accepted {
            self.end = mid;
        } else {
            self.beg = mid + 1;
        }
    }

    pub fn result(&self) -> u8 {
        self.end
    }
}

impl Default for PrefixSearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the prefix length for a stateless server from `(plen, population)`
/// sweep samples, where `population` counts answered sub-subnets out of
/// `2^step`.
///
/// Priority: largest population within `[2, lossrate * step^2]`, then the
/// single-response sample closest to 64, then the smallest population above
/// the in-limit bound, then 64. Ties break toward the smaller prefix
/// length. Errors when every sample exceeds the bound, since a server that
/// advertises for every probed name carries no prefix information.
pub fn select_plen(samples: &[(u8, usize)], step: u8, lossrate: f64) -> Result<u8> {
    let limit = (lossrate * (step as f64) * (step as f64)).floor() as usize;

    if !samples.is_empty() && samples.iter().all(|(_, pop)| *pop > limit) {
        return Err(Error::RespondsToAllPrefixes);
    }

    if let Some((plen, _)) = samples
        .iter()
        .filter(|(_, pop)| (2..=limit).contains(pop))
        .max_by_key(|(plen, pop)| (*pop, std::cmp::Reverse(*plen)))
    {
        return Ok(*plen);
    }

    if let Some((plen, _)) = samples
        .iter()
        .filter(|(_, pop)| *pop == 1)
        .min_by_key(|(plen, _)| ((*plen as i32 - 64).abs(), *plen))
    {
        return Ok(*plen);
    }

    if let Some((plen, _)) = samples
        .iter()
        .filter(|(_, pop)| *pop > limit)
        .min_by_key(|(plen, pop)| (*pop, *plen))
    {
        return Ok(*plen);
    }

    Ok(64)
}
