//! Configuration validation functions

use crate::error::{PlatformError, Result};
use crate::host::HostFamily;
use std::collections::HashMap;

/// Longest accepted rule prefix; netsh rule names grow by `Block_<n>`
pub const MAX_RULE_PREFIX_LEN: usize = 20;

/// Validate rule prefix (ASCII alphanumeric, '_' or '-', max 20 chars)
pub fn validate_rule_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(PlatformError::Config(
            "Rule prefix cannot be empty".to_string(),
        ));
    }

    if prefix.len() > MAX_RULE_PREFIX_LEN {
        return Err(PlatformError::Config(format!(
            "Rule prefix '{}' exceeds maximum length of {} characters",
            prefix, MAX_RULE_PREFIX_LEN
        )));
    }

    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(PlatformError::Config(format!(
            "Rule prefix '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            prefix
        )));
    }

    Ok(())
}

/// Validate one `[firewall.backends]` entry
pub fn validate_backend_override(family: &str, backend: &str) -> Result<()> {
    family.parse::<HostFamily>().map_err(|_| {
        PlatformError::Config(format!(
            "Unknown OS family '{}' in backend overrides (expected Windows, Linux, Mac or Unknown)",
            family
        ))
    })?;

    if backend.trim().is_empty() {
        return Err(PlatformError::Config(format!(
            "Backend override for '{}' cannot be empty",
            family
        )));
    }

    Ok(())
}

/// Reject override tables naming one family under several spellings
pub fn validate_distinct_families<'a>(keys: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen: HashMap<HostFamily, Vec<&str>> = HashMap::new();
    for key in keys {
        if let Ok(family) = key.parse::<HostFamily>() {
            seen.entry(family).or_default().push(key);
        }
    }

    for family in HostFamily::ALL {
        if let Some(keys) = seen.get_mut(&family).filter(|keys| keys.len() > 1) {
            keys.sort_unstable();
            return Err(PlatformError::Config(format!(
                "OS family {} has more than one backend override: [{}]",
                family,
                keys.join(", ")
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rule_prefix() {
        assert!(validate_rule_prefix("IPBan_").is_ok());
        assert!(validate_rule_prefix("ip-ban").is_ok());
        assert!(validate_rule_prefix("").is_err());
        assert!(validate_rule_prefix("has space").is_err());
        assert!(validate_rule_prefix("semi;colon").is_err());
        assert!(validate_rule_prefix("a_very_long_rule_prefix").is_err());
        assert!(validate_rule_prefix("Ünïcode").is_err());
    }

    #[test]
    fn test_validate_backend_override() {
        assert!(validate_backend_override("Linux", "iptables").is_ok());
        assert!(validate_backend_override("osx", "memory").is_ok());
        assert!(validate_backend_override("Solaris", "ipf").is_err());
        assert!(validate_backend_override("Windows", "  ").is_err());
    }

    #[test]
    fn test_validate_distinct_families() {
        assert!(validate_distinct_families(["Linux", "Windows"].into_iter()).is_ok());
        assert!(validate_distinct_families(["Linux", " linux "].into_iter()).is_err());
        assert!(validate_distinct_families(["mac", "OSX"].into_iter()).is_err());
        assert!(validate_distinct_families(std::iter::empty()).is_ok());
    }
}
