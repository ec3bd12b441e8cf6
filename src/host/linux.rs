//! Linux distribution probing
//!
//! Concatenates every `/etc/*release*` file through the shell into a scoped
//! temporary file and pulls the distribution id, name and version out of the
//! combined text. The layout of those files differs between distributions
//! (os-release, lsb-release, redhat-release, ...), so extraction is a
//! line-anchored, case-insensitive search where the first match wins.

use super::{read_tool_output, HostProfile};
use crate::error::{PlatformError, Result};
use crate::process::{run_process, CommandExecutor};
use regex::RegexBuilder;
use tempfile::TempDir;
use tracing::{debug, warn};

const ID_PATTERN: &str = r"^[ \t]*(?:ID|DISTRIB_ID)\s*=(.*)$";
const NAME_PATTERN: &str = r"^[ \t]*(?:NAME|DISTRIB_CODENAME)\s*=(.*)$";
const VERSION_PATTERN: &str = r"^[ \t]*VERSION_ID\s*=(.*)$";

/// Distribution facts pulled from release files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    /// `<id>` or `<id> - <name>`, empty when no id was found
    pub friendly_name: String,
    /// `VERSION_ID`, or the fallback version
    pub version: String,
}

pub(super) fn probe(executor: &dyn CommandExecutor, profile: &mut HostProfile) -> Result<()> {
    // Removed on drop, whichever way this function exits
    let scratch = TempDir::new()?;
    let output_path = scratch.path().join("os-release.txt");
    let script = format!("cat /etc/*release* > '{}'", output_path.display());

    run_process(executor, "/bin/sh", &["-c", &script], None)?;

    let contents = read_tool_output(&output_path)?
        .ok_or_else(|| PlatformError::Probe("no release files found under /etc".to_string()))?;

    let release = parse_os_release(&contents, &profile.version);
    debug!("Parsed release files: {:?}", release);
    profile.friendly_name = release.friendly_name;
    profile.version = release.version;
    Ok(())
}

/// Parse concatenated release files.
///
/// `fallback_version` is kept when no `VERSION_ID` line exists.
pub fn parse_os_release(contents: &str, fallback_version: &str) -> OsRelease {
    let id = extract_value(contents, ID_PATTERN, "");
    let mut friendly_name = id.clone();
    if !id.is_empty() {
        let name = extract_value(contents, NAME_PATTERN, "");
        if !name.is_empty() {
            friendly_name = format!("{} - {}", id, name);
        }
    }

    OsRelease {
        friendly_name,
        version: extract_value(contents, VERSION_PATTERN, fallback_version),
    }
}

/// First capture of `pattern` in `text`, stripped of quotes, brackets,
/// parentheses and whitespace; `default` when nothing matches.
fn extract_value(text: &str, pattern: &str, default: &str) -> String {
    let regex = match RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
    {
        Ok(regex) => regex,
        Err(e) => {
            warn!("Invalid extraction pattern {}: {}", pattern, e);
            return default.to_string();
        }
    };

    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .trim_matches(|c: char| c.is_whitespace() || "\"'()[]{}".contains(c))
                .to_string()
        })
        .unwrap_or_else(|| default.to_string())
}
