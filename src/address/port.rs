//! Port ranges for range-based block rules

use crate::error::{PlatformError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inclusive range of TCP/UDP ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRange {
    /// First port
    pub start: u16,
    /// Last port
    pub end: u16,
}

impl PortRange {
    /// Create a range, swapping the bounds if given in reverse
    pub fn new(start: u16, end: u16) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Range holding exactly one port
    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    /// Whether `port` is inside the range
    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    /// `start:end` form used by iptables multiport
    pub fn to_multiport(&self) -> String {
        if self.start == self.end {
            self.start.to_string()
        } else {
            format!("{}:{}", self.start, self.end)
        }
    }

    /// Every port in 0..=65535 that none of `allowed` covers, as sorted
    /// non-overlapping ranges.
    pub fn complement(allowed: &[PortRange]) -> Vec<PortRange> {
        let mut sorted = allowed.to_vec();
        sorted.sort();

        let mut blocked = Vec::new();
        // Next port not yet known to be allowed; u32 so it can pass 65535
        let mut next: u32 = 0;
        for range in sorted {
            if u32::from(range.start) > next {
                blocked.push(PortRange::new(next as u16, range.start - 1));
            }
            next = next.max(u32::from(range.end) + 1);
        }
        if next <= u32::from(u16::MAX) {
            blocked.push(PortRange::new(next as u16, u16::MAX));
        }
        blocked
    }
}

impl FromStr for PortRange {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| PlatformError::Validation(format!("Invalid port range: {}", s)))
        };
        match s.split_once('-') {
            Some((start, end)) => Ok(Self::new(parse(start)?, parse(end)?)),
            None => Ok(Self::single(parse(s)?)),
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}
