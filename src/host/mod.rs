//! Host identification
//!
//! This module probes the running host once at startup and records which
//! operating system family, version and edition it is. Backend selection keys
//! off the family. Probing shells out to native tools and parses their
//! free-form output, so every branch is allowed to fail: failures are logged
//! and leave the profile at its defaults.

mod linux;
mod windows;

pub use linux::{parse_os_release, OsRelease};
pub use windows::{parse_cim_list, parse_wmic_table};

use crate::error::{PlatformError, Result};
use crate::process::{CommandExecutor, ProcessRunner};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Coarse operating system classification driving backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostFamily {
    /// Windows-like
    Windows,
    /// Linux-like
    Linux,
    /// Mac-like
    Mac,
    /// Anything else, or detection failed
    Unknown,
}

impl HostFamily {
    /// Every family, in declaration order
    pub const ALL: [HostFamily; 4] = [Self::Windows, Self::Linux, Self::Mac, Self::Unknown];

    /// Map a Rust target OS name (`std::env::consts::OS`) to a family
    pub fn from_os_name(os: &str) -> Self {
        match os.to_ascii_lowercase().as_str() {
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            "macos" => Self::Mac,
            _ => Self::Unknown,
        }
    }

    /// Canonical family name, used as the override-table key
    pub fn name(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Linux => "Linux",
            Self::Mac => "Mac",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for HostFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HostFamily {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "mac" | "macos" | "osx" => Ok(Self::Mac),
            "unknown" => Ok(Self::Unknown),
            other => Err(PlatformError::Validation(format!(
                "Unknown OS family '{}'",
                other
            ))),
        }
    }
}

/// Immutable facts about the running host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostProfile {
    family: HostFamily,
    version: String,
    friendly_name: String,
    description: String,
}

impl HostProfile {
    /// Build a profile from known values
    pub fn new(
        family: HostFamily,
        version: impl Into<String>,
        friendly_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            family,
            version: version.into(),
            friendly_name: friendly_name.into(),
            description: description.into(),
        }
    }

    /// Probe the current host. Call once at startup and pass the result
    /// to whatever needs it.
    pub fn detect() -> Self {
        // Release files and the OS caption are world-readable
        let runner = ProcessRunner::new().with_elevation(false);
        Self::detect_with(std::env::consts::OS, &runner)
    }

    /// Probe as if running on `os_name`, using `executor` for native tools
    pub fn detect_with(os_name: &str, executor: &dyn CommandExecutor) -> Self {
        let family = HostFamily::from_os_name(os_name);
        let (generic_version, description) = platform_version();
        let mut profile = Self::new(family, generic_version, "", description);

        match family {
            HostFamily::Linux => {
                if let Err(e) = linux::probe(executor, &mut profile) {
                    warn!("Linux host probe failed: {}", e);
                }
            }
            HostFamily::Windows => {
                if let Err(e) = windows::probe(executor, &mut profile) {
                    warn!("Windows host probe failed: {}", e);
                }
            }
            HostFamily::Mac => profile.friendly_name = "OSX".to_string(),
            HostFamily::Unknown => profile.friendly_name = "Unknown".to_string(),
        }

        info!("Detected host: {}", profile);
        profile
    }

    /// OS family
    pub fn family(&self) -> HostFamily {
        self.family
    }

    /// Best-effort version string
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Distribution or edition name, empty if undeterminable
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Raw platform description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Single-line diagnostics summary
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HostProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OS: {}, Version: {}, Friendly Name: {}, Description: {}",
            self.family, self.version, self.friendly_name, self.description
        )
    }
}

/// Generic version and description from uname(2)
#[cfg(unix)]
fn platform_version() -> (String, String) {
    use std::ffi::CStr;

    // SAFETY: utsname is plain data, so an all-zero value is valid to pass in.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    // SAFETY: uts is a valid, writable utsname.
    if unsafe { libc::uname(&mut uts) } != 0 {
        return (String::new(), std::env::consts::OS.to_string());
    }

    let field = |raw: &[libc::c_char]| {
        // SAFETY: uname NUL-terminates every field it fills in.
        unsafe { CStr::from_ptr(raw.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    };
    let release = field(&uts.release);
    let description = format!("{} {} {}", field(&uts.sysname), release, field(&uts.version));
    (release, description)
}

#[cfg(not(unix))]
fn platform_version() -> (String, String) {
    let description = match std::env::consts::OS {
        "windows" => "Microsoft Windows".to_string(),
        other => other.to_string(),
    };
    (String::new(), description)
}

/// Read a probe output file. `None` when the tool never produced it or left
/// it empty.
fn read_tool_output(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(decode_tool_output(&bytes)))
}

/// Decode native tool output: UTF-16LE when it carries a BOM (what Windows
/// redirection produces), UTF-8 otherwise.
pub fn decode_tool_output(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockCommandExecutor;
    use serial_test::serial;

    #[test]
    fn test_family_from_os_name() {
        assert_eq!(HostFamily::from_os_name("linux"), HostFamily::Linux);
        assert_eq!(HostFamily::from_os_name("windows"), HostFamily::Windows);
        assert_eq!(HostFamily::from_os_name("macos"), HostFamily::Mac);
        assert_eq!(HostFamily::from_os_name("freebsd"), HostFamily::Unknown);
        assert_eq!(HostFamily::from_os_name(""), HostFamily::Unknown);
    }

    #[test]
    fn test_family_parse_and_display() {
        for family in HostFamily::ALL {
            assert_eq!(family.to_string().parse::<HostFamily>().unwrap(), family);
        }
        assert_eq!("OSX".parse::<HostFamily>().unwrap(), HostFamily::Mac);
        assert_eq!(" linux ".parse::<HostFamily>().unwrap(), HostFamily::Linux);
        assert!("beos".parse::<HostFamily>().is_err());
    }

    #[test]
    fn test_unknown_platform_skips_probing() {
        // No expectations: any call to the mock would panic
        let mock = MockCommandExecutor::new();
        let profile = HostProfile::detect_with("haiku", &mock);
        assert_eq!(profile.family(), HostFamily::Unknown);
        assert_eq!(profile.friendly_name(), "Unknown");
    }

    #[test]
    fn test_mac_is_shallow() {
        let mock = MockCommandExecutor::new();
        let profile = HostProfile::detect_with("macos", &mock);
        assert_eq!(profile.family(), HostFamily::Mac);
        assert_eq!(profile.friendly_name(), "OSX");
    }

    #[test]
    fn test_probe_failure_keeps_defaults() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .returning(|program, _| Err(PlatformError::Process(format!("{} missing", program))));

        let linux = HostProfile::detect_with("linux", &mock);
        assert_eq!(linux.family(), HostFamily::Linux);
        assert_eq!(linux.friendly_name(), "");

        let windows = HostProfile::detect_with("windows", &mock);
        assert_eq!(windows.family(), HostFamily::Windows);
        assert_eq!(windows.friendly_name(), "");
    }

    #[test]
    #[serial]
    fn test_detect_current_host() {
        let profile = HostProfile::detect();
        assert!(HostFamily::ALL.contains(&profile.family()));
        assert!(!profile.description().is_empty());
    }

    #[test]
    fn test_summary() {
        let profile = HostProfile::new(
            HostFamily::Linux,
            "22.04",
            "ubuntu - Ubuntu",
            "Linux 5.15.0",
        );
        assert_eq!(
            profile.summary(),
            "OS: Linux, Version: 22.04, Friendly Name: ubuntu - Ubuntu, Description: Linux 5.15.0"
        );
    }

    #[test]
    fn test_profile_serializes() {
        let profile = HostProfile::new(
            HostFamily::Windows,
            "10.0.19045",
            "Microsoft Windows 10 Pro",
            "",
        );
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["family"], "Windows");
        assert_eq!(json["friendly_name"], "Microsoft Windows 10 Pro");
    }

    #[test]
    fn test_decode_utf16_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "Caption  Version".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_tool_output(&bytes), "Caption  Version");
    }

    #[test]
    fn test_decode_utf8() {
        assert_eq!(decode_tool_output(b"ID=debian\n"), "ID=debian\n");
        assert_eq!(decode_tool_output(&[0xEF, 0xBB, 0xBF, b'x']), "x");
    }

    #[test]
    fn test_read_tool_output_missing_and_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        assert!(read_tool_output(&path).unwrap().is_none());

        fs::write(&path, b"").unwrap();
        assert!(read_tool_output(&path).unwrap().is_none());

        fs::write(&path, b"ID=arch").unwrap();
        assert_eq!(read_tool_output(&path).unwrap().as_deref(), Some("ID=arch"));
    }
}
