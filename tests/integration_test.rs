//! Integration tests for ipban-platform
//!
//! These tests drive the public API the way a service would at startup:
//! load config, build a profile, select a backend and reconcile sets.

use ipban_platform::address::{self, AddressRange, PortRange};
use ipban_platform::config::Config;
use ipban_platform::firewall::{
    BackendDescriptor, BackendRegistry, FirewallBackend, MemoryFirewall, DEFAULT_RULE_PREFIX,
};
use ipban_platform::{HostFamily, HostProfile, PlatformError};
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

fn profile(family: HostFamily) -> HostProfile {
    HostProfile::new(family, "1.0", "test", "integration host")
}

fn memory() -> Box<dyn FirewallBackend> {
    Box::new(MemoryFirewall::new())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_config_drives_selection() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[firewall]
rule_prefix = "Int_"

[firewall.backends]
linux = "Firewalld"
"#
    )
    .unwrap();
    let config = Config::load(Some(file.path())).unwrap();

    let registry = BackendRegistry::new()
        .register(
            BackendDescriptor::new(HostFamily::Linux, "IptablesFirewall")
                .with_custom_name("Iptables"),
            memory,
        )
        .register(
            BackendDescriptor::new(HostFamily::Linux, "FirewalldFirewall")
                .with_custom_name("Firewalld"),
            memory,
        );

    let entry = registry
        .resolve(&profile(HostFamily::Linux), &config.firewall.backends)
        .unwrap();
    assert_eq!(entry.descriptor.type_name, "FirewalldFirewall");

    let backend = registry
        .select_backend(
            &profile(HostFamily::Linux),
            &config.firewall.backends,
            config.firewall.rule_prefix(),
        )
        .unwrap();
    assert_eq!(backend.rule_prefix(), "Int_");
}

#[test]
fn test_builtin_registry_on_mac_is_fatal() {
    let Err(err) =
        BackendRegistry::builtin().select_backend(&profile(HostFamily::Mac), &HashMap::new(), "")
    else {
        panic!("a Mac host must not get a backend");
    };
    assert!(matches!(err, PlatformError::Selection(_)));
}

#[test]
fn test_builtin_unknown_host_gets_memory_backend() {
    let mut backend = BackendRegistry::builtin()
        .select_backend(&profile(HostFamily::Unknown), &HashMap::new(), "")
        .unwrap();
    assert_eq!(backend.rule_prefix(), DEFAULT_RULE_PREFIX);

    assert!(backend.block_addresses(&strings(&["1.2.3.4", "5.6.7.8", "1.2.3.4"])));
    let mut blocked: Vec<String> = backend.enumerate_blocked().collect();
    blocked.sort();
    assert_eq!(blocked, strings(&["1.2.3.4", "5.6.7.8"]));

    assert!(backend.block_addresses(&[]));
    assert_eq!(backend.enumerate_blocked().count(), 0);
}

#[test]
fn test_reserved_addresses_never_reach_backend() {
    let mut backend = memory();
    backend.initialize("IPBan_").unwrap();
    backend.block_addresses(&strings(&["0.0.0.0", "::", "127.0.0.1", "::1", "  ", "10.1.1.1"]));

    assert_eq!(backend.enumerate_blocked().collect::<Vec<_>>(), strings(&["10.1.1.1"]));
    for reserved in ["0.0.0.0", "::", "127.0.0.1", "::1"] {
        assert!(!address::is_eligible(reserved));
        assert!(!backend.is_blocked(reserved));
    }
}

#[test]
fn test_normalize_is_idempotent_on_samples() {
    for raw in ["  1.2.3.4 ", "10.0.0.0/8", "2001:db8::/32", "192.0.2.1-192.0.2.9"] {
        let once = address::normalize(raw).unwrap();
        assert_eq!(address::normalize(&once).as_deref(), Some(once.as_str()));
    }
}

#[test]
fn test_range_rules_respect_allowed_ports() {
    let mut firewall = MemoryFirewall::new();
    firewall.initialize("IPBan_").unwrap();

    let ranges: Vec<AddressRange> = vec!["198.51.100.0/24".parse().unwrap()];
    let ports: Vec<PortRange> = vec!["22".parse().unwrap(), "8000-8080".parse().unwrap()];
    assert!(firewall.block_ranges("Geo_", &ranges, &ports));

    assert!(firewall.is_blocked_on_port("198.51.100.20", 443));
    assert!(!firewall.is_blocked_on_port("198.51.100.20", 8042));
    assert_eq!(firewall.range_rule_names().collect::<Vec<_>>(), vec!["Geo_"]);
}

#[test]
fn test_config_with_family_named_twice_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[firewall.backends]
linux = "iptables"
Linux = "memory"
"#
    )
    .unwrap();

    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, PlatformError::Config(_)));
}

#[test]
fn test_default_config_without_file() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.firewall.rule_prefix(), DEFAULT_RULE_PREFIX);
}
