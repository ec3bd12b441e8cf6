//! Configuration management
//!
//! The binary reads a small TOML file naming the firewall rule prefix and an
//! optional per-family backend override table. The library itself takes
//! these values as plain arguments and never reads configuration on its own.

mod toml_parser;
mod validation;

pub use toml_parser::{TomlConfig, TomlFirewallConfig};

use crate::error::{PlatformError, Result};
use crate::firewall::{effective_rule_prefix, DEFAULT_RULE_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ipban/platform.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Firewall settings
    #[serde(default)]
    pub firewall: FirewallConfig,
}

/// Firewall backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Prefix for every rule and set the backend creates
    #[serde(default = "default_rule_prefix")]
    pub rule_prefix: String,

    /// OS family name to backend name
    #[serde(default)]
    pub backends: HashMap<String, String>,
}

impl Config {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let toml_config = TomlConfig::from_file(path)?;
        Ok(toml_config.into())
    }

    /// Load the file at `path`, or [`DEFAULT_CONFIG_PATH`] when `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error. The result is validated either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                info!("Loading configuration from {}", DEFAULT_CONFIG_PATH);
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            None => {
                debug!("No configuration at {}, using defaults", DEFAULT_CONFIG_PATH);
                Self::new()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.firewall
            .validate()
            .map_err(|e| PlatformError::Config(format!("[firewall]: {}", e)))
    }
}

impl FirewallConfig {
    /// Validate firewall settings
    pub fn validate(&self) -> Result<()> {
        validation::validate_rule_prefix(self.rule_prefix())?;
        for (family, backend) in &self.backends {
            validation::validate_backend_override(family, backend)?;
        }
        validation::validate_distinct_families(self.backends.keys().map(String::as_str))?;
        Ok(())
    }

    /// Rule prefix with blank values replaced by the default
    pub fn rule_prefix(&self) -> &str {
        effective_rule_prefix(&self.rule_prefix)
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            rule_prefix: default_rule_prefix(),
            backends: HashMap::new(),
        }
    }
}

fn default_rule_prefix() -> String {
    DEFAULT_RULE_PREFIX.to_string()
}
