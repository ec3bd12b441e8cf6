//! Windows Firewall backend (netsh advfirewall)
//!
//! Managed addresses are spread over inbound rules named `<prefix>Block_<n>`
//! and `<prefix>Allow_<n>`, each holding at most [`MAX_ADDRESSES_PER_RULE`]
//! remote addresses. Rules are numbered from zero without gaps.

use super::{canonical_entry, eligible_set, FirewallBackend, DEFAULT_RULE_PREFIX};
use crate::address::{self, AddressRange, PortRange};
use crate::error::{PlatformError, Result};
use crate::process::{run_process, CommandExecutor, ProcessRunner};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::{debug, error, info, warn};

/// Remote addresses written into a single firewall rule
pub const MAX_ADDRESSES_PER_RULE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Block,
    Allow,
}

impl RuleKind {
    fn label(self) -> &'static str {
        match self {
            Self::Block => "Block",
            Self::Allow => "Allow",
        }
    }

    fn action(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Allow => "allow",
        }
    }
}

/// Windows backend driving `netsh advfirewall firewall`
pub struct WindowsFirewall {
    executor: Box<dyn CommandExecutor>,
    rule_prefix: String,
}

impl WindowsFirewall {
    /// Backend running the real `netsh`
    pub fn new() -> Self {
        Self::with_executor(Box::new(ProcessRunner::new()))
    }

    /// Backend running `netsh` through `executor`
    pub fn with_executor(executor: Box<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            rule_prefix: DEFAULT_RULE_PREFIX.to_string(),
        }
    }

    fn rule_name(&self, kind: RuleKind, index: usize) -> String {
        format!("{}{}_{}", self.rule_prefix, kind.label(), index)
    }

    fn netsh(&self, args: &[&str], allowed_exit_codes: Option<&[i32]>) -> Result<String> {
        let mut full = vec!["advfirewall", "firewall"];
        full.extend_from_slice(args);
        Ok(run_process(self.executor.as_ref(), "netsh", &full, allowed_exit_codes)?.stdout)
    }

    /// Remote addresses of rule `name`, or `None` when no such rule exists
    fn show_rule(&self, name: &str) -> Result<Option<Vec<String>>> {
        let name_arg = format!("name={}", name);
        let output = run_process(
            self.executor.as_ref(),
            "netsh",
            &["advfirewall", "firewall", "show", "rule", &name_arg],
            None,
        )?;
        if output.timed_out {
            return Err(PlatformError::Timeout(format!("netsh show rule {} did not finish", name)));
        }
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(parse_remote_ips(&output.stdout)))
    }

    /// Every existing rule of `kind`, in index order
    fn list_rules(&self, kind: RuleKind) -> Result<Vec<Vec<String>>> {
        let mut rules = Vec::new();
        while let Some(addresses) = self.show_rule(&self.rule_name(kind, rules.len()))? {
            rules.push(addresses);
        }
        Ok(rules)
    }

    fn add_rule(
        &self,
        name: &str,
        action: &str,
        remote: &str,
        ports: Option<(&str, &str)>,
    ) -> Result<()> {
        let name_arg = format!("name={}", name);
        let action_arg = format!("action={}", action);
        let remote_arg = format!("remoteip={}", remote);
        let mut args: Vec<&str> = vec![
            "add",
            "rule",
            &name_arg,
            "dir=in",
            &action_arg,
            "profile=any",
            "enable=yes",
            &remote_arg,
        ];

        let protocol_arg;
        let port_arg;
        match ports {
            Some((protocol, local_ports)) => {
                protocol_arg = format!("protocol={}", protocol);
                port_arg = format!("localport={}", local_ports);
                args.push(&protocol_arg);
                args.push(&port_arg);
            }
            None => args.push("protocol=any"),
        }

        self.netsh(&args, Some(&[0]))?;
        Ok(())
    }

    fn update_rule(&self, name: &str, remote: &str) -> Result<()> {
        let name_arg = format!("name={}", name);
        let remote_arg = format!("remoteip={}", remote);
        self.netsh(&["set", "rule", &name_arg, "new", &remote_arg], Some(&[0]))?;
        Ok(())
    }

    /// Delete every rule called `name`; absent rules are not an error
    fn delete_rule(&self, name: &str) -> Result<()> {
        let name_arg = format!("name={}", name);
        self.netsh(&["delete", "rule", &name_arg], Some(&[0, 1]))?;
        Ok(())
    }

    fn sync_rules(&self, kind: RuleKind, desired: &BTreeSet<String>) -> Result<usize> {
        let existing = self.list_rules(kind)?;
        let current: BTreeSet<String> = existing.iter().flatten().cloned().collect();
        if current == *desired {
            debug!("{} rules already up to date", kind.label());
            return Ok(0);
        }

        let entries: Vec<&str> = desired.iter().map(String::as_str).collect();
        let chunks: Vec<&[&str]> = entries.chunks(MAX_ADDRESSES_PER_RULE).collect();
        let mut changed = 0;

        for (index, chunk) in chunks.iter().enumerate() {
            let name = self.rule_name(kind, index);
            let remote = chunk.join(",");
            match existing.get(index) {
                Some(held) if held.iter().map(String::as_str).eq(chunk.iter().copied()) => continue,
                Some(_) => self.update_rule(&name, &remote)?,
                None => self.add_rule(&name, kind.action(), &remote, None)?,
            }
            changed += 1;
        }

        for index in chunks.len()..existing.len() {
            self.delete_rule(&self.rule_name(kind, index))?;
            changed += 1;
        }
        Ok(changed)
    }

    fn reconcile(&self, kind: RuleKind, addresses: &[String]) -> bool {
        let desired: BTreeSet<String> = eligible_set(addresses)
            .into_iter()
            .filter_map(|normalized| normalized.parse::<AddressRange>().ok())
            .map(|range| canonical_entry(&range))
            .collect();

        match self.sync_rules(kind, &desired) {
            Ok(changed) => {
                if changed > 0 {
                    info!(
                        "Rewrote {} {} rules for {} addresses",
                        changed,
                        kind.label(),
                        desired.len()
                    );
                }
                true
            }
            Err(e) => {
                error!("Failed to update {} rules: {}", kind.label(), e);
                false
            }
        }
    }

    fn contains(&self, kind: RuleKind, address: &str) -> bool {
        let Some((_, range)) = address::parse_eligible(address) else {
            return false;
        };
        let entry = canonical_entry(&range);
        let rules = match self.list_rules(kind) {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Failed to read {} rules: {}", kind.label(), e);
                return false;
            }
        };

        rules.iter().flatten().any(|held| {
            *held == entry
                || range.as_single().is_some_and(|ip| {
                    held.parse::<AddressRange>()
                        .is_ok_and(|held_range| held_range.contains(&ip))
                })
        })
    }

    fn enumerate(&self, kind: RuleKind) -> Box<dyn Iterator<Item = String> + '_> {
        let rules = self.list_rules(kind).unwrap_or_else(|e| {
            warn!("Failed to read {} rules: {}", kind.label(), e);
            Vec::new()
        });
        Box::new(rules.into_iter().flatten())
    }

    fn replace_range_rule(
        &self,
        name: &str,
        ranges: &[AddressRange],
        allowed_ports: &[PortRange],
    ) -> Result<()> {
        self.delete_rule(name)?;
        if ranges.is_empty() {
            return Ok(());
        }

        let blocked_ports = if allowed_ports.is_empty() {
            None
        } else {
            let complement = PortRange::complement(allowed_ports);
            if complement.is_empty() {
                debug!("Range rule {} allows every port, nothing to block", name);
                return Ok(());
            }
            Some(complement.iter().map(netsh_ports).collect::<Vec<_>>().join(","))
        };

        let entries: Vec<String> = ranges.iter().map(canonical_entry).collect();
        for chunk in entries.chunks(MAX_ADDRESSES_PER_RULE) {
            let remote = chunk.join(",");
            match &blocked_ports {
                None => self.add_rule(name, "block", &remote, None)?,
                Some(ports) => {
                    for protocol in ["tcp", "udp"] {
                        self.add_rule(name, "block", &remote, Some((protocol, ports)))?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for WindowsFirewall {
    fn default() -> Self {
        Self::new()
    }
}

impl FirewallBackend for WindowsFirewall {
    fn initialize(&mut self, rule_prefix: &str) -> Result<()> {
        info!("Initializing Windows firewall with prefix '{}'", rule_prefix);
        self.rule_prefix = rule_prefix.to_string();

        // Fails fast when netsh is missing or the firewall service is stopped
        self.netsh(&["show", "rule", "name=all", "dir=in", "verbose=no"], Some(&[0, 1]))
            .map_err(|e| PlatformError::Backend(format!("Windows firewall unavailable: {}", e)))?;
        Ok(())
    }

    fn rule_prefix(&self) -> &str {
        &self.rule_prefix
    }

    fn block_addresses(&mut self, addresses: &[String]) -> bool {
        self.reconcile(RuleKind::Block, addresses)
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

        match self.replace_range_rule(name, ranges, allowed_ports) {
            Ok(()) => {
                info!("Range rule {} now holds {} ranges", name, ranges.len());
                true
            }
            Err(e) => {
                error!("Failed to replace range rule {}: {}", name, e);
                false
            }
        }
    }

    fn allow_addresses(&mut self, addresses: &[String]) -> bool {
        self.reconcile(RuleKind::Allow, addresses)
    }

    fn is_blocked(&self, address: &str) -> bool {
        self.contains(RuleKind::Block, address)
    }

    fn is_allowed(&self, address: &str) -> bool {
        self.contains(RuleKind::Allow, address)
    }

    fn enumerate_blocked(&self) -> Box<dyn Iterator<Item = String> + '_> {
        self.enumerate(RuleKind::Block)
    }

    fn enumerate_allowed(&self) -> Box<dyn Iterator<Item = String> + '_> {
        self.enumerate(RuleKind::Allow)
    }
}

fn netsh_ports(ports: &PortRange) -> String {
    if ports.start == ports.end {
        ports.start.to_string()
    } else {
        format!("{}-{}", ports.start, ports.end)
    }
}

/// Addresses listed on the `RemoteIP:` line of `show rule` output
fn parse_remote_ips(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("RemoteIP:"))
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.eq_ignore_ascii_case("any"))
        .map(canonical_remote)
        .collect()
}

/// Rewrite `addr/32`, `addr/128` and `addr/255.0.0.0` into the forms
/// [`canonical_entry`] produces
fn canonical_remote(entry: &str) -> String {
    let Some((addr, suffix)) = entry.split_once('/') else {
        return entry.to_string();
    };

    let prefix_len = match suffix.parse::<u8>() {
        Ok(len) => len,
        Err(_) => match suffix.parse::<Ipv4Addr>() {
            Ok(mask) => u32::from(mask).leading_ones() as u8,
            Err(_) => return entry.to_string(),
        },
    };

    match format!("{}/{}", addr, prefix_len).parse::<AddressRange>() {
        Ok(range) => canonical_entry(&range),
        Err(_) => entry.to_string(),
    }
}
