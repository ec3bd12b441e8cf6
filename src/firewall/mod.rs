//! Firewall backend contract and selection
//!
//! This module defines what every firewall backend must support, the
//! built-in backends, and the registry that picks exactly one of them for
//! the detected host.
//!
//! Backends own their packet-filter state; callers only ever see the
//! [`FirewallBackend`] trait object returned by
//! [`BackendRegistry::select_backend`].

mod iptables;
mod memory;
mod registry;
mod windows;

pub use iptables::IptablesFirewall;
pub use memory::MemoryFirewall;
pub use registry::{BackendDescriptor, BackendFactory, BackendRegistry, RegistryEntry};
pub use windows::WindowsFirewall;

use crate::address::{self, AddressRange, PortRange};
use crate::error::Result;
use std::collections::BTreeSet;
use tracing::debug;

/// Rule prefix used when the caller supplies a blank one
pub const DEFAULT_RULE_PREFIX: &str = "IPBan_";

/// Operations every packet-filter backend supports.
///
/// Mutating calls take `&mut self`: a backend has a single writer. Address
/// arguments are raw strings; backends drop ineligible entries (see
/// [`crate::address::normalize`]) instead of failing on them.
pub trait FirewallBackend: Send + Sync {
    /// Set up the backend's rules under `rule_prefix`. Safe to call again.
    fn initialize(&mut self, rule_prefix: &str) -> Result<()>;

    /// Prefix the backend's rules are namespaced under
    fn rule_prefix(&self) -> &str;

    /// Replace the managed block set with exactly `addresses`.
    ///
    /// An empty slice clears every managed block. Returns `false` if any
    /// part of the reconciliation failed; details go to the log.
    fn block_addresses(&mut self, addresses: &[String]) -> bool;

    /// Replace the rule set named `rule_prefix` with rules blocking `ranges`
    /// on every port except `allowed_ports`.
    fn block_ranges(
        &mut self,
        rule_prefix: &str,
        ranges: &[AddressRange],
        allowed_ports: &[PortRange],
    ) -> bool;

    /// Replace the managed allow set with exactly `addresses`.
    fn allow_addresses(&mut self, addresses: &[String]) -> bool;

    /// Whether `address` is in the managed block set
    fn is_blocked(&self, address: &str) -> bool;

    /// Whether `address` is in the managed allow set
    fn is_allowed(&self, address: &str) -> bool;

    /// Current managed block set. Each call reads fresh state.
    fn enumerate_blocked(&self) -> Box<dyn Iterator<Item = String> + '_>;

    /// Current managed allow set. Each call reads fresh state.
    fn enumerate_allowed(&self) -> Box<dyn Iterator<Item = String> + '_>;
}

/// `prefix`, or [`DEFAULT_RULE_PREFIX`] when it is blank
pub fn effective_rule_prefix(prefix: &str) -> &str {
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        DEFAULT_RULE_PREFIX
    } else {
        trimmed
    }
}

/// Eligible, de-duplicated, normalized entries of `addresses`
pub(crate) fn eligible_set(addresses: &[String]) -> BTreeSet<String> {
    addresses
        .iter()
        .filter_map(|raw| {
            let normalized = address::normalize(raw);
            if normalized.is_none() {
                debug!("Skipping ineligible address {:?}", raw);
            }
            normalized
        })
        .collect()
}

/// The text a backend stores and lists `range` under.
///
/// Anything denoting one host collapses to the bare address, networks lose
/// their host bits, and addresses print in their standard form (IPv6
/// lowercased and compressed). Two spellings of the same entry map to the
/// same text.
pub(crate) fn canonical_entry(range: &AddressRange) -> String {
    if let Some(ip) = range.as_single() {
        return ip.to_string();
    }
    match range {
        AddressRange::Network(net) => net.trunc().to_string(),
        other => other.to_string(),
    }
}

/// Additions and removals that turn one managed set into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Reconciliation {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl Reconciliation {
    pub fn plan(current: &BTreeSet<String>, desired: &BTreeSet<String>) -> Self {
        Self {
            add: desired.difference(current).cloned().collect(),
            remove: current.difference(desired).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}
