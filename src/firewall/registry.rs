//! Backend registry and selection
//!
//! The set of backends is fixed at build time. Each entry pairs a small
//! descriptor (required OS family, type name, optional short name) with a
//! constructor. Selection filters entries by the detected family, applies the
//! caller's per-family override, constructs the winner and initializes it.

use super::{
    effective_rule_prefix, FirewallBackend, IptablesFirewall, MemoryFirewall, WindowsFirewall,
};
use crate::error::{PlatformError, Result};
use crate::host::{HostFamily, HostProfile};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Constructor for a registered backend
pub type BackendFactory = fn() -> Box<dyn FirewallBackend>;

/// Static metadata describing a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Host family the backend works on
    pub family: HostFamily,
    /// Intrinsic name of the implementing type
    pub type_name: &'static str,
    /// Optional short name accepted in overrides
    pub custom_name: Option<&'static str>,
}

impl BackendDescriptor {
    /// Descriptor without a short name
    pub const fn new(family: HostFamily, type_name: &'static str) -> Self {
        Self {
            family,
            type_name,
            custom_name: None,
        }
    }

    /// Attach a short name
    pub const fn with_custom_name(mut self, name: &'static str) -> Self {
        self.custom_name = Some(name);
        self
    }

    /// Whether an override value refers to this backend (case-insensitive)
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        self.type_name.eq_ignore_ascii_case(name)
            || self
                .custom_name
                .is_some_and(|custom| custom.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.custom_name {
            Some(custom) => write!(f, "{} ({}, {})", self.type_name, custom, self.family),
            None => write!(f, "{} ({})", self.type_name, self.family),
        }
    }
}

/// A descriptor and the constructor it describes
#[derive(Clone)]
pub struct RegistryEntry {
    /// Metadata used for selection
    pub descriptor: BackendDescriptor,
    /// Builds an uninitialized backend
    pub factory: BackendFactory,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Compile-time table of known backends
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    entries: Vec<RegistryEntry>,
}

fn create_iptables() -> Box<dyn FirewallBackend> {
    Box::new(IptablesFirewall::default())
}

fn create_windows() -> Box<dyn FirewallBackend> {
    Box::new(WindowsFirewall::default())
}

fn create_memory() -> Box<dyn FirewallBackend> {
    Box::new(MemoryFirewall::default())
}

impl BackendRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry holding every backend compiled into this crate
    pub fn builtin() -> Self {
        Self::new()
            .register(
                BackendDescriptor::new(HostFamily::Linux, "IptablesFirewall")
                    .with_custom_name("iptables"),
                create_iptables,
            )
            .register(
                BackendDescriptor::new(HostFamily::Windows, "WindowsFirewall")
                    .with_custom_name("netsh"),
                create_windows,
            )
            .register(
                BackendDescriptor::new(HostFamily::Unknown, "MemoryFirewall")
                    .with_custom_name("memory"),
                create_memory,
            )
    }

    /// Add a backend
    pub fn register(mut self, descriptor: BackendDescriptor, factory: BackendFactory) -> Self {
        self.entries.push(RegistryEntry {
            descriptor,
            factory,
        });
        self
    }

    /// All registered entries, in registration order
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Entries valid for `family`, ordered by type name (case-insensitive)
    pub fn candidates(&self, family: HostFamily) -> Vec<&RegistryEntry> {
        let mut candidates: Vec<&RegistryEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.descriptor.family == family)
            .collect();
        candidates.sort_by_key(|entry| entry.descriptor.type_name.to_ascii_lowercase());
        candidates
    }

    /// Pick the entry for `profile` without constructing anything.
    ///
    /// With a non-empty `overrides` map (family name to backend name) the
    /// entry for the detected family must exist and name an eligible backend.
    /// Without overrides the first candidate in name order wins.
    pub fn resolve(
        &self,
        profile: &HostProfile,
        overrides: &HashMap<String, String>,
    ) -> Result<&RegistryEntry> {
        if self.entries.is_empty() {
            return Err(PlatformError::Selection(
                "No firewall backends are registered".to_string(),
            ));
        }

        let family = profile.family();
        let candidates = self.candidates(family);
        debug!(
            "Backend candidates for {}: {:?}",
            family,
            candidates
                .iter()
                .map(|entry| entry.descriptor.type_name)
                .collect::<Vec<_>>()
        );

        if overrides.is_empty() {
            return candidates.into_iter().next().ok_or_else(|| {
                PlatformError::Selection(format!(
                    "No firewall backend supports OS family {}",
                    family
                ))
            });
        }

        let wanted = override_for(overrides, family)?.ok_or_else(|| {
            PlatformError::Selection(format!(
                "Backend overrides are configured but none is given for OS family {}",
                family
            ))
        })?;

        let available: Vec<&str> = candidates
            .iter()
            .map(|entry| entry.descriptor.type_name)
            .collect();
        candidates
            .into_iter()
            .find(|entry| entry.descriptor.matches(wanted))
            .ok_or_else(|| {
                PlatformError::Selection(format!(
                    "No {} firewall backend named '{}' (available: [{}])",
                    family,
                    wanted,
                    available.join(", ")
                ))
            })
    }

    /// Resolve, construct and initialize the backend for `profile`.
    ///
    /// A blank `rule_prefix` falls back to [`super::DEFAULT_RULE_PREFIX`].
    /// Every failure here is fatal for the caller: there is no sensible way
    /// to run without a firewall.
    pub fn select_backend(
        &self,
        profile: &HostProfile,
        overrides: &HashMap<String, String>,
        rule_prefix: &str,
    ) -> Result<Box<dyn FirewallBackend>> {
        let entry = self.resolve(profile, overrides)?;
        let prefix = effective_rule_prefix(rule_prefix);

        info!(
            "Selected firewall backend {} with rule prefix '{}'",
            entry.descriptor, prefix
        );

        let mut backend = (entry.factory)();
        backend.initialize(prefix).map_err(|e| {
            PlatformError::Selection(format!(
                "Failed to initialize firewall backend {}: {}",
                entry.descriptor.type_name, e
            ))
        })?;
        Ok(backend)
    }
}

/// The override value whose key names `family`.
///
/// Keys are family names matched case-insensitively, so `linux` and `Linux`
/// are the same key; a map holding both is rejected rather than letting hash
/// order decide.
fn override_for<'a>(
    overrides: &'a HashMap<String, String>,
    family: HostFamily,
) -> Result<Option<&'a str>> {
    let mut matching: Vec<(&String, &String)> = overrides
        .iter()
        .filter(|(key, _)| key.parse::<HostFamily>().is_ok_and(|f| f == family))
        .collect();

    match matching.len() {
        0 => Ok(None),
        1 => Ok(Some(matching[0].1.trim())),
        _ => {
            matching.sort();
            let keys: Vec<&str> = matching.iter().map(|(key, _)| key.as_str()).collect();
            Err(PlatformError::Selection(format!(
                "Backend overrides name OS family {} more than once: [{}]",
                family,
                keys.join(", ")
            )))
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
