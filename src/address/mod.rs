//! Address eligibility
//!
//! Decides whether a raw string may be handed to a firewall backend. An
//! eligible value is non-blank, parses as an address, CIDR network or span,
//! and is not an unspecified or loopback host address. The normalized value is
//! the trimmed input, untouched otherwise.

mod port;
mod range;

pub use port::PortRange;
pub use range::AddressRange;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// Normalize a raw address for firewall use.
///
/// Returns the trimmed string when it is eligible and `None` otherwise. Never
/// fails loudly: ineligible input is an ordinary outcome.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let range = match trimmed.parse::<AddressRange>() {
        Ok(range) => range,
        Err(e) => {
            debug!("Ignoring ineligible address {:?}: {}", trimmed, e);
            return None;
        }
    };

    if let AddressRange::Single(ip) = range {
        if is_reserved_host(&ip) {
            debug!("Refusing reserved address {}", trimmed);
            return None;
        }
    }

    Some(trimmed.to_string())
}

/// Shorthand for `normalize(raw).is_some()`
pub fn is_eligible(raw: &str) -> bool {
    normalize(raw).is_some()
}

/// Normalize and parse in one step, for backends that need the structure
pub fn parse_eligible(raw: &str) -> Option<(String, AddressRange)> {
    let normalized = normalize(raw)?;
    let range = normalized.parse().ok()?;
    Some((normalized, range))
}

/// 0.0.0.0, ::, 127.0.0.1 and ::1 in any spelling
fn is_reserved_host(ip: &IpAddr) -> bool {
    ip.is_unspecified()
        || *ip == IpAddr::V4(Ipv4Addr::LOCALHOST)
        || *ip == IpAddr::V6(Ipv6Addr::LOCALHOST)
}
