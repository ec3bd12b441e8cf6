//! TOML configuration file parser
//!
//! Mirrors the on-disk layout so that every table and key is optional; the
//! conversion into [`Config`] fills in defaults.

use crate::config::{Config, FirewallConfig};
use crate::error::{PlatformError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    /// `[firewall]` table
    #[serde(default)]
    pub firewall: Option<TomlFirewallConfig>,
}

/// TOML `[firewall]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlFirewallConfig {
    /// Rule prefix, blank or absent means the default
    pub rule_prefix: Option<String>,

    /// `[firewall.backends]` family to backend name table
    #[serde(default)]
    pub backends: HashMap<String, String>,
}

impl TomlConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            PlatformError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml)
            .map_err(|e| PlatformError::Config(format!("Failed to parse TOML: {}", e)))
    }
}

impl From<TomlConfig> for Config {
    fn from(toml: TomlConfig) -> Self {
        Config {
            firewall: toml.firewall.map(Into::into).unwrap_or_default(),
        }
    }
}

impl From<TomlFirewallConfig> for FirewallConfig {
    fn from(toml: TomlFirewallConfig) -> Self {
        let defaults = FirewallConfig::default();
        FirewallConfig {
            rule_prefix: toml
                .rule_prefix
                .map(|prefix| prefix.trim().to_string())
                .filter(|prefix| !prefix.is_empty())
                .unwrap_or(defaults.rule_prefix),
            backends: toml
                .backends
                .into_iter()
                .map(|(family, backend)| (family.trim().to_string(), backend.trim().to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [firewall]
            rule_prefix = "Custom_"

            [firewall.backends]
            Linux = "iptables"
            windows = "netsh"
        "#;

        let config = TomlConfig::parse(toml).expect("Failed to parse TOML");
        let firewall = config.firewall.as_ref().unwrap();
        assert_eq!(firewall.rule_prefix.as_deref(), Some("Custom_"));
        assert_eq!(firewall.backends.len(), 2);
        assert_eq!(firewall.backends["windows"], "netsh");
    }

    #[test]
    fn test_parse_empty_file() {
        let config = TomlConfig::parse("").expect("Failed to parse TOML");
        assert!(config.firewall.is_none());

        let config: Config = config.into();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_blank_prefix_becomes_default() {
        let toml = r#"
            [firewall]
            rule_prefix = "  "
        "#;

        let config: Config = TomlConfig::parse(toml).unwrap().into();
        assert_eq!(config.firewall.rule_prefix, "IPBan_");
    }

    #[test]
    fn test_convert_trims_override_entries() {
        let toml = r#"
            [firewall.backends]
            " Linux " = " iptables "
        "#;

        let config: Config = TomlConfig::parse(toml).unwrap().into();
        assert_eq!(config.firewall.backends["Linux"], "iptables");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let toml = r#"
            [firewall]
            rule_prefx = "typo_"
        "#;

        assert!(matches!(TomlConfig::parse(toml), Err(PlatformError::Config(_))));
    }

    #[test]
    fn test_invalid_syntax_rejected() {
        assert!(TomlConfig::parse("[firewall").is_err());
    }
}
