//! In-process firewall backend
//!
//! Keeps the managed sets in memory and filters nothing. Selected on hosts
//! whose family is not recognized, and used wherever a backend with exact
//! contract semantics is needed without touching the host firewall.

use super::{canonical_entry, eligible_set, FirewallBackend, DEFAULT_RULE_PREFIX};
use crate::address::{self, AddressRange, PortRange};
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct RangeRule {
    ranges: Vec<AddressRange>,
    allowed_ports: Vec<PortRange>,
}

/// Firewall backend holding its state in memory
#[derive(Debug, Clone)]
pub struct MemoryFirewall {
    rule_prefix: String,
    blocked: BTreeMap<String, AddressRange>,
    allowed: BTreeMap<String, AddressRange>,
    range_rules: BTreeMap<String, RangeRule>,
}

impl MemoryFirewall {
    /// Create an empty, uninitialized backend
    pub fn new() -> Self {
        Self {
            rule_prefix: DEFAULT_RULE_PREFIX.to_string(),
            blocked: BTreeMap::new(),
            allowed: BTreeMap::new(),
            range_rules: BTreeMap::new(),
        }
    }

    /// Whether traffic from `address` to `port` is dropped, taking range
    /// rules and their port exceptions into account
    pub fn is_blocked_on_port(&self, address: &str, port: u16) -> bool {
        if self.is_allowed(address) {
            return false;
        }
        if self.is_blocked(address) {
            return true;
        }
        let Some(ip) = address::parse_eligible(address).and_then(|(_, range)| range.as_single())
        else {
            return false;
        };
        self.range_rules.values().any(|rule| {
            rule.ranges.iter().any(|range| range.contains(&ip))
                && !rule.allowed_ports.iter().any(|ports| ports.contains(port))
        })
    }

    /// Names of the range rule sets currently held
    pub fn range_rule_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.range_rules.keys().map(String::as_str)
    }

    fn replace(set: &mut BTreeMap<String, AddressRange>, addresses: &[String]) {
        set.clear();
        for normalized in eligible_set(addresses) {
            // eligible_set only yields parseable values
            if let Ok(range) = normalized.parse::<AddressRange>() {
                set.insert(canonical_entry(&range), range);
            }
        }
    }

    fn lookup(set: &BTreeMap<String, AddressRange>, address: &str) -> bool {
        let Some((_, range)) = address::parse_eligible(address) else {
            return false;
        };
        if set.contains_key(&canonical_entry(&range)) {
            return true;
        }
        range
            .as_single()
            .is_some_and(|ip| set.values().any(|entry| entry.contains(&ip)))
    }
}

impl Default for MemoryFirewall {
    fn default() -> Self {
        Self::new()
    }
}

impl FirewallBackend for MemoryFirewall {
    fn initialize(&mut self, rule_prefix: &str) -> Result<()> {
        info!("Initializing in-memory firewall with prefix '{}'", rule_prefix);
        self.rule_prefix = rule_prefix.to_string();
        Ok(())
    }

    fn rule_prefix(&self) -> &str {
        &self.rule_prefix
    }

    fn block_addresses(&mut self, addresses: &[String]) -> bool {
        Self::replace(&mut self.blocked, addresses);
        debug!("Memory firewall now blocks {} entries", self.blocked.len());
        true
    }

    fn block_ranges(
        &mut self,
        rule_prefix: &str,
        ranges: &[AddressRange],
        allowed_ports: &[PortRange],
    ) -> bool {
        let name = rule_prefix.trim();
        if name.is_empty() {
            warn!("Refusing range rule with a blank name");
            return false;
        }

        self.range_rules.remove(name);
        if !ranges.is_empty() {
            self.range_rules.insert(
                name.to_string(),
                RangeRule {
                    ranges: ranges.to_vec(),
                    allowed_ports: allowed_ports.to_vec(),
                },
            );
        }
        true
    }

    fn allow_addresses(&mut self, addresses: &[String]) -> bool {
        Self::replace(&mut self.allowed, addresses);
        debug!("Memory firewall now allows {} entries", self.allowed.len());
        true
    }

    fn is_blocked(&self, address: &str) -> bool {
        Self::lookup(&self.blocked, address)
    }

    fn is_allowed(&self, address: &str) -> bool {
        Self::lookup(&self.allowed, address)
    }

    fn enumerate_blocked(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(self.blocked.keys().cloned())
    }

    fn enumerate_allowed(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(self.allowed.keys().cloned())
    }
}
