//! iptables backend (uses ipset for address matching)
//!
//! Managed addresses live in four hash:net sets, `<prefix>Blacklist`,
//! `<prefix>Whitelist` and their `_6` IPv6 twins. Each set is referenced by one
//! rule at the top of `INPUT`; the allow rule is kept above the block rule.
//! Reconciliation diffs `ipset save` output against the requested set and
//! applies the difference in one `ipset restore` batch.

use super::{canonical_entry, eligible_set, FirewallBackend, Reconciliation, DEFAULT_RULE_PREFIX};
use crate::address::{self, AddressRange, PortRange};
use crate::error::{PlatformError, Result};
use crate::process::{run_process, run_process_with_stdin, CommandExecutor, ProcessRunner};
use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, error, info, warn};

const INPUT_CHAIN: &str = "INPUT";
const IPV6_SUFFIX: &str = "_6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetKind {
    Block,
    Allow,
}

impl SetKind {
    fn suffix(self) -> &'static str {
        match self {
            Self::Block => "Blacklist",
            Self::Allow => "Whitelist",
        }
    }

    fn target(self) -> &'static str {
        match self {
            Self::Block => "DROP",
            Self::Allow => "ACCEPT",
        }
    }
}

fn iptables_tool(ipv6: bool) -> &'static str {
    if ipv6 {
        "ip6tables"
    } else {
        "iptables"
    }
}

fn ipset_family(ipv6: bool) -> &'static str {
    if ipv6 {
        "inet6"
    } else {
        "inet"
    }
}

/// Linux firewall backend driving iptables/ip6tables and ipset
pub struct IptablesFirewall {
    executor: Box<dyn CommandExecutor>,
    rule_prefix: String,
}

impl IptablesFirewall {
    /// Backend running the real system tools
    pub fn new() -> Self {
        Self::with_executor(Box::new(ProcessRunner::new()))
    }

    /// Backend running tools through `executor`
    pub fn with_executor(executor: Box<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            rule_prefix: DEFAULT_RULE_PREFIX.to_string(),
        }
    }

    fn set_name(&self, kind: SetKind, ipv6: bool) -> String {
        format!(
            "{}{}{}",
            self.rule_prefix,
            kind.suffix(),
            if ipv6 { IPV6_SUFFIX } else { "" }
        )
    }

    fn create_set(&self, name: &str, ipv6: bool) -> Result<()> {
        run_process(
            self.executor.as_ref(),
            "ipset",
            &["create", name, "hash:net", "family", ipset_family(ipv6), "-exist"],
            Some(&[0]),
        )?;
        Ok(())
    }

    /// Insert `rule` at the top of INPUT unless an identical rule exists
    fn ensure_rule(&self, ipv6: bool, rule: &[&str], move_to_top: bool) -> Result<()> {
        let tool = iptables_tool(ipv6);
        let mut check = vec!["-C", INPUT_CHAIN];
        check.extend_from_slice(rule);
        let present = run_process(self.executor.as_ref(), tool, &check, None)?.success();

        if present && !move_to_top {
            return Ok(());
        }
        if present {
            let mut delete = vec!["-D", INPUT_CHAIN];
            delete.extend_from_slice(rule);
            run_process(self.executor.as_ref(), tool, &delete, Some(&[0]))?;
        }

        let mut insert = vec!["-I", INPUT_CHAIN, "1"];
        insert.extend_from_slice(rule);
        run_process(self.executor.as_ref(), tool, &insert, Some(&[0]))?;
        Ok(())
    }

    fn list_set(&self, name: &str) -> Result<Vec<String>> {
        let output = run_process(self.executor.as_ref(), "ipset", &["save", name], Some(&[0]))?;
        Ok(parse_ipset_save(&output.stdout, name))
    }

    fn apply(&self, name: &str, plan: &Reconciliation) -> Result<()> {
        let script = restore_script(name, plan);
        run_process_with_stdin(
            self.executor.as_ref(),
            "ipset",
            &["restore"],
            &script,
            Some(&[0]),
        )?;
        Ok(())
    }

    fn reconcile(&self, kind: SetKind, addresses: &[String]) -> bool {
        let mut desired: [BTreeSet<String>; 2] = [BTreeSet::new(), BTreeSet::new()];
        for normalized in eligible_set(addresses) {
            if let Ok(range) = normalized.parse::<AddressRange>() {
                desired[usize::from(range.is_ipv6())].extend(ipset_entries(&range));
            }
        }

        let mut ok = true;
        for ipv6 in [false, true] {
            let name = self.set_name(kind, ipv6);
            let current: BTreeSet<String> = match self.list_set(&name) {
                Ok(entries) => entries.into_iter().collect(),
                Err(e) => {
                    error!("Failed to read ipset {}: {}", name, e);
                    ok = false;
                    continue;
                }
            };

            let plan = Reconciliation::plan(&current, &desired[usize::from(ipv6)]);
            if plan.is_empty() {
                debug!("ipset {} already up to date", name);
                continue;
            }

            match self.apply(&name, &plan) {
                Ok(()) => info!(
                    "Updated ipset {}: {} added, {} removed",
                    name,
                    plan.add.len(),
                    plan.remove.len()
                ),
                Err(e) => {
                    error!("Failed to update ipset {}: {}", name, e);
                    ok = false;
                }
            }
        }
        ok
    }

    fn contains(&self, kind: SetKind, address: &str) -> bool {
        let Some((_, range)) = address::parse_eligible(address) else {
            return false;
        };
        let name = self.set_name(kind, range.is_ipv6());
        ipset_entries(&range).iter().all(|entry| {
            match run_process(self.executor.as_ref(), "ipset", &["test", &name, entry], None) {
                Ok(output) => output.success(),
                Err(e) => {
                    warn!("Failed to query ipset {}: {}", name, e);
                    false
                }
            }
        })
    }

    fn enumerate(&self, kind: SetKind) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new([false, true].into_iter().flat_map(move |ipv6| {
            let name = self.set_name(kind, ipv6);
            self.list_set(&name)
                .unwrap_or_else(|e| {
                    warn!("Failed to list ipset {}: {}", name, e);
                    Vec::new()
                })
                .into_iter()
        }))
    }

    /// Drop every INPUT rule matching `set`, as listed by `iptables -S`
    fn remove_set_rules(&self, ipv6: bool, set: &str) -> Result<()> {
        let tool = iptables_tool(ipv6);
        let listing = run_process(self.executor.as_ref(), tool, &["-S", INPUT_CHAIN], Some(&[0]))?;
        let needle = format!("--match-set {} ", set);

        for line in listing.stdout.lines().filter(|line| line.contains(&needle)) {
            let mut args: Vec<&str> = line.split_whitespace().collect();
            if args.first() != Some(&"-A") {
                continue;
            }
            args[0] = "-D";
            run_process(self.executor.as_ref(), tool, &args, Some(&[0]))?;
        }
        Ok(())
    }

    fn replace_range_set(
        &self,
        set: &str,
        ipv6: bool,
        ranges: &[AddressRange],
        allowed_ports: &[PortRange],
    ) -> Result<()> {
        self.remove_set_rules(ipv6, set)?;
        // Absent on first use
        run_process(self.executor.as_ref(), "ipset", &["destroy", set], None)?;

        if ranges.is_empty() {
            return Ok(());
        }

        self.create_set(set, ipv6)?;
        let plan = Reconciliation {
            add: ranges.iter().flat_map(ipset_entries).collect(),
            remove: Vec::new(),
        };
        self.apply(set, &plan)?;

        let tool = iptables_tool(ipv6);
        if allowed_ports.is_empty() {
            run_process(
                self.executor.as_ref(),
                tool,
                &["-A", INPUT_CHAIN, "-m", "set", "--match-set", set, "src", "-j", "DROP"],
                Some(&[0]),
            )?;
            return Ok(());
        }

        let ports = allowed_ports
            .iter()
            .map(PortRange::to_multiport)
            .collect::<Vec<_>>()
            .join(",");
        for protocol in ["tcp", "udp"] {
            run_process(
                self.executor.as_ref(),
                tool,
                &[
                    "-A",
                    INPUT_CHAIN,
                    "-p",
                    protocol,
                    "-m",
                    "set",
                    "--match-set",
                    set,
                    "src",
                    "-m",
                    "multiport",
                    "!",
                    "--dports",
                    &ports,
                    "-j",
                    "DROP",
                ],
                Some(&[0]),
            )?;
        }
        Ok(())
    }
}

impl Default for IptablesFirewall {
    fn default() -> Self {
        Self::new()
    }
}

impl FirewallBackend for IptablesFirewall {
    fn initialize(&mut self, rule_prefix: &str) -> Result<()> {
        info!("Initializing iptables firewall with prefix '{}'", rule_prefix);
        self.rule_prefix = rule_prefix.to_string();

        for ipv6 in [false, true] {
            for kind in [SetKind::Block, SetKind::Allow] {
                let name = self.set_name(kind, ipv6);
                self.create_set(&name, ipv6)?;
                self.ensure_rule(
                    ipv6,
                    &["-m", "set", "--match-set", &name, "src", "-j", kind.target()],
                    kind == SetKind::Allow,
                )
                .map_err(|e| {
                    PlatformError::Backend(format!(
                        "Failed to hook ipset {} into INPUT: {}",
                        name, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn rule_prefix(&self) -> &str {
        &self.rule_prefix
    }

    fn block_addresses(&mut self, addresses: &[String]) -> bool {
        self.reconcile(SetKind::Block, addresses)
    }

    fn block_ranges(
        &mut self,
        rule_prefix: &str,
        ranges: &[AddressRange],
        allowed_ports: &[PortRange],
    ) -> bool {
        let base = rule_prefix.trim();
        if base.is_empty() {
            warn!("Refusing range rule with a blank name");
            return false;
        }

        let mut ok = true;
        for ipv6 in [false, true] {
            let set = format!("{}{}", base, if ipv6 { IPV6_SUFFIX } else { "" });
            let family_ranges: Vec<AddressRange> = ranges
                .iter()
                .filter(|range| range.is_ipv6() == ipv6)
                .copied()
                .collect();

            match self.replace_range_set(&set, ipv6, &family_ranges, allowed_ports) {
                Ok(()) => info!("Range rule {} now holds {} ranges", set, family_ranges.len()),
                Err(e) => {
                    error!("Failed to replace range rule {}: {}", set, e);
                    ok = false;
                }
            }
        }
        ok
    }

    fn allow_addresses(&mut self, addresses: &[String]) -> bool {
        self.reconcile(SetKind::Allow, addresses)
    }

    fn is_blocked(&self, address: &str) -> bool {
        self.contains(SetKind::Block, address)
    }

    fn is_allowed(&self, address: &str) -> bool {
        self.contains(SetKind::Allow, address)
    }

    fn enumerate_blocked(&self) -> Box<dyn Iterator<Item = String> + '_> {
        self.enumerate(SetKind::Block)
    }

    fn enumerate_allowed(&self) -> Box<dyn Iterator<Item = String> + '_> {
        self.enumerate(SetKind::Allow)
    }
}

/// The entries ipset stores and lists for `range`.
///
/// hash:net sets keep a span as the CIDR blocks covering it, so a span is
/// expanded here into those blocks to compare against `ipset save` output.
fn ipset_entries(range: &AddressRange) -> Vec<String> {
    let blocks: Vec<IpNet> = match *range {
        AddressRange::Span {
            start: IpAddr::V4(start),
            end: IpAddr::V4(end),
        } => Ipv4Subnets::new(start, end, 0).map(IpNet::V4).collect(),
        AddressRange::Span {
            start: IpAddr::V6(start),
            end: IpAddr::V6(end),
        } => Ipv6Subnets::new(start, end, 0).map(IpNet::V6).collect(),
        _ => return vec![canonical_entry(range)],
    };
    blocks
        .into_iter()
        .map(|net| canonical_entry(&AddressRange::Network(net)))
        .collect()
}

/// Members of `set` from `ipset save` output
fn parse_ipset_save(output: &str, set: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some("add"), Some(name), Some(entry)) if name == set => Some(entry.to_string()),
                _ => None,
            }
        })
        .collect()
}

fn restore_script(set: &str, plan: &Reconciliation) -> String {
    let mut script = String::new();
    for entry in &plan.remove {
        script.push_str(&format!("del {} {} -exist\n", set, entry));
    }
    for entry in &plan.add {
        script.push_str(&format!("add {} {} -exist\n", set, entry));
    }
    script
}
