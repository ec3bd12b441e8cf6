//! IP address range parsing
//!
//! Accepts the three notations firewall rules are written in: a single
//! address, a CIDR network, or an inclusive `start-end` span.

use crate::error::{PlatformError, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A parsed address, network or span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressRange {
    /// One address
    Single(IpAddr),
    /// CIDR network, e.g. `10.0.0.0/8`
    Network(IpNet),
    /// Inclusive span, e.g. `10.0.0.1-10.0.0.9`
    Span {
        /// First address
        start: IpAddr,
        /// Last address
        end: IpAddr,
    },
}

impl AddressRange {
    /// Whether `ip` falls inside this range
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Single(addr) => addr == ip,
            Self::Network(net) => net.contains(ip),
            Self::Span { start, end } => match (start, end, ip) {
                (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(i)) => s <= i && i <= e,
                (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(i)) => s <= i && i <= e,
                _ => false,
            },
        }
    }

    /// IPv6 range
    pub fn is_ipv6(&self) -> bool {
        match self {
            Self::Single(addr) => addr.is_ipv6(),
            Self::Network(net) => matches!(net, IpNet::V6(_)),
            Self::Span { start, .. } => start.is_ipv6(),
        }
    }

    /// The single address this range denotes, if it denotes exactly one
    pub fn as_single(&self) -> Option<IpAddr> {
        match self {
            Self::Single(addr) => Some(*addr),
            Self::Network(net) if net.prefix_len() == net.max_prefix_len() => Some(net.addr()),
            Self::Span { start, end } if start == end => Some(*start),
            _ => None,
        }
    }
}

impl FromStr for AddressRange {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PlatformError::Validation("Empty address range".to_string()));
        }

        if s.contains('/') {
            return s
                .parse::<IpNet>()
                .map(Self::Network)
                .map_err(|_| PlatformError::Validation(format!("Invalid CIDR: {}", s)));
        }

        // IPv6 literals never contain '-', so this split is unambiguous
        if let Some((start, end)) = s.split_once('-') {
            let start = parse_ip(start.trim())?;
            let end = parse_ip(end.trim())?;
            let ordered = match (start, end) {
                (IpAddr::V4(a), IpAddr::V4(b)) => a <= b,
                (IpAddr::V6(a), IpAddr::V6(b)) => a <= b,
                _ => {
                    return Err(PlatformError::Validation(format!(
                        "Address span mixes IPv4 and IPv6: {}",
                        s
                    )))
                }
            };
            if !ordered {
                return Err(PlatformError::Validation(format!(
                    "Address span start is after its end: {}",
                    s
                )));
            }
            return Ok(Self::Span { start, end });
        }

        parse_ip(s).map(Self::Single)
    }
}

fn parse_ip(s: &str) -> Result<IpAddr> {
    s.parse()
        .map_err(|_| PlatformError::Validation(format!("Invalid IP address: {}", s)))
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(addr) => write!(f, "{}", addr),
            Self::Network(net) => write!(f, "{}", net),
            Self::Span { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}
