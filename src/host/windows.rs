//! Windows edition probing
//!
//! Asks `wmic` for the OS caption and version as a fixed-width table written
//! to a scratch file. Newer Windows builds ship without `wmic`; when its
//! output never appears the same two fields are read through a CIM query
//! instead.

use super::{read_tool_output, HostProfile};
use crate::error::{PlatformError, Result};
use crate::process::{run_process, CommandExecutor};
use tempfile::TempDir;
use tracing::{debug, info};

const CIM_QUERY: &str = "Get-CimInstance -ClassName Win32_OperatingSystem \
    | Select-Object -First 1 Caption,Version | Format-List";

pub(super) fn probe(executor: &dyn CommandExecutor, profile: &mut HostProfile) -> Result<()> {
    let scratch = TempDir::new()?;
    let output_path = scratch.path().join("os-info.txt");
    let output_arg = format!("/output:{}", output_path.display());

    if let Err(e) = run_process(
        executor,
        "wmic",
        &[
            &output_arg,
            "path",
            "Win32_OperatingSystem",
            "get",
            "Caption,Version",
            "/format:table",
        ],
        None,
    ) {
        debug!("wmic unavailable: {}", e);
    }

    if let Some(table) = read_tool_output(&output_path)? {
        if let Some((caption, version)) = parse_wmic_table(&table) {
            apply(profile, caption, version);
            return Ok(());
        }
        debug!("Unrecognized wmic output: {:?}", table);
    }

    info!("wmic produced no usable output, falling back to CIM query");
    let output = run_process(
        executor,
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", CIM_QUERY],
        Some(&[0]),
    )?;

    let (caption, version) = parse_cim_list(&output.stdout).ok_or_else(|| {
        PlatformError::Probe("CIM query returned no operating system record".to_string())
    })?;
    apply(profile, caption, version);
    Ok(())
}

fn apply(profile: &mut HostProfile, caption: String, version: String) {
    profile.friendly_name = caption;
    if !version.is_empty() {
        profile.version = version;
    }
}

/// Split a `wmic ... get Caption,Version` table into (caption, version).
///
/// The header line fixes the column where `Version` starts; the first data
/// line is cut at that column.
pub fn parse_wmic_table(text: &str) -> Option<(String, String)> {
    let mut lines = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty());

    let header = lines.next()?;
    let column = header.find("Version")?;
    let data = lines.next()?;

    let (caption, version) = match data.char_indices().nth(char_column(header, column)) {
        Some((split, _)) => data.split_at(split),
        None => (data, ""),
    };
    Some((caption.trim().to_string(), version.trim().to_string()))
}

/// Character index of a byte offset in `header`, so multi-byte captions
/// still line up with the header's columns.
fn char_column(header: &str, byte_offset: usize) -> usize {
    header[..byte_offset].chars().count()
}

/// Read `Caption` and `Version` from `Format-List` output, first record only.
pub fn parse_cim_list(text: &str) -> Option<(String, String)> {
    let mut caption = None;
    let mut version = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            k if k.eq_ignore_ascii_case("Caption") && caption.is_none() => caption = Some(value),
            k if k.eq_ignore_ascii_case("Version") && version.is_none() => version = Some(value),
            _ => {}
        }
        if caption.is_some() && version.is_some() {
            break;
        }
    }

    Some((caption?, version.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostFamily;
    use crate::process::{CommandOutput, MockCommandExecutor};
    use std::fs;

    const TABLE: &str = "Caption                          Version     \r\n\
        Microsoft Windows 10 Pro         10.0.19045  \r\n\
        \r\n";

    fn utf16_with_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_parse_wmic_table() {
        let (caption, version) = parse_wmic_table(TABLE).unwrap();
        assert_eq!(caption, "Microsoft Windows 10 Pro");
        assert_eq!(version, "10.0.19045");
    }

    #[test]
    fn test_parse_wmic_table_leading_blank_lines() {
        let text = format!("\r\n\r\n{}", TABLE);
        assert_eq!(parse_wmic_table(&text).unwrap().1, "10.0.19045");
    }

    #[test]
    fn test_parse_wmic_table_short_data_line() {
        let text = "Caption          Version\nWindows\n";
        assert_eq!(
            parse_wmic_table(text),
            Some(("Windows".to_string(), String::new()))
        );
    }

    #[test]
    fn test_parse_wmic_table_non_ascii_caption() {
        let text = "Caption                   Version\nMicrosoft Windows 11 Éd.  10.0.22631\n";
        let (caption, version) = parse_wmic_table(text).unwrap();
        assert_eq!(caption, "Microsoft Windows 11 Éd.");
        assert_eq!(version, "10.0.22631");
    }

    #[test]
    fn test_parse_wmic_table_rejects_garbage() {
        assert!(parse_wmic_table("").is_none());
        assert!(parse_wmic_table("No Instance(s) Available.\n").is_none());
        assert!(parse_wmic_table("Caption Version\n").is_none());
    }

    #[test]
    fn test_parse_cim_list() {
        let text = "\r\nCaption : Microsoft Windows 11 Pro\r\nVersion : 10.0.22631\r\n\r\n\
            Caption : second record\r\nVersion : 0\r\n";
        assert_eq!(
            parse_cim_list(text),
            Some(("Microsoft Windows 11 Pro".to_string(), "10.0.22631".to_string()))
        );
        assert!(parse_cim_list("nothing here").is_none());
    }

    #[test]
    fn test_probe_prefers_wmic_output_file() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|program, _| program == "wmic")
            .times(1)
            .returning(|_, args| {
                let path = args[0].strip_prefix("/output:").unwrap();
                fs::write(path, utf16_with_bom(TABLE)).unwrap();
                Ok(CommandOutput {
                    code: Some(0),
                    ..CommandOutput::default()
                })
            });

        let profile = HostProfile::detect_with("windows", &mock);
        assert_eq!(profile.family(), HostFamily::Windows);
        assert_eq!(profile.friendly_name(), "Microsoft Windows 10 Pro");
        assert_eq!(profile.version(), "10.0.19045");
    }

    #[test]
    fn test_probe_falls_back_to_cim() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|program, _| program == "wmic")
            .times(1)
            .returning(|_, _| Err(PlatformError::Process("wmic not found".to_string())));
        mock.expect_execute()
            .withf(|program, args| {
                program == "powershell"
                    && args.iter().any(|a| a.contains("Win32_OperatingSystem"))
            })
            .times(1)
            .returning(|_, _| {
                Ok(CommandOutput {
                    stdout: "Caption : Microsoft Windows Server 2022 Standard\r\n\
                             Version : 10.0.20348\r\n"
                        .to_string(),
                    code: Some(0),
                    ..CommandOutput::default()
                })
            });

        let profile = HostProfile::detect_with("windows", &mock);
        assert_eq!(profile.friendly_name(), "Microsoft Windows Server 2022 Standard");
        assert_eq!(profile.version(), "10.0.20348");
    }

    #[test]
    fn test_probe_failing_fallback_keeps_defaults() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|program, _| program == "wmic")
            .returning(|_, _| Ok(CommandOutput::default()));
        mock.expect_execute()
            .withf(|program, _| program == "powershell")
            .returning(|_, _| {
                Ok(CommandOutput {
                    code: Some(1),
                    ..CommandOutput::default()
                })
            });

        let mut profile = HostProfile::new(HostFamily::Windows, "", "", "Microsoft Windows");
        assert!(probe(&mock, &mut profile).is_err());
        assert_eq!(profile.friendly_name(), "");
    }
}
