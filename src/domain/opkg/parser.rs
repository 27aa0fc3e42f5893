//! opkg Output Parsing
//!
//! Best-effort transforms from package-manager text to records. Malformed
//! lines and blocks are skipped, never rejected wholesale.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Field delimiter in `list-installed` / `list-upgradable` output
pub const FIELD_DELIMITER: &str = " - ";

/// Version reported when a listing line carries none
pub const UNKNOWN_VERSION: &str = "unknown";

/// An installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// A package with a newer version available
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradablePackage {
    pub name: String,
    pub current_version: String,
    pub new_version: String,
}

/// Detail block of one package (`opkg info`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDetail {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Non-blank lines, without trailing `\r`
fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
}

fn fields(line: &str) -> Vec<&str> {
    line.split(FIELD_DELIMITER).map(str::trim).collect()
}

fn installed_line(line: &str) -> Result<InstalledPackage, ParseError> {
    let parts = fields(line);
    let name = parts.first().copied().unwrap_or_default();
    if name.is_empty() {
        return Err(ParseError::MissingName);
    }

    let version = match parts.get(1) {
        Some(version) if !version.is_empty() => (*version).to_string(),
        _ => UNKNOWN_VERSION.to_string(),
    };

    Ok(InstalledPackage {
        name: name.to_string(),
        version,
        description: parts.get(2).map(|d| (*d).to_string()).unwrap_or_default(),
    })
}

fn upgradable_line(line: &str) -> Result<UpgradablePackage, ParseError> {
    let parts = fields(line);
    if parts.len() < 3 {
        return Err(ParseError::TooFewFields {
            expected: 3,
            found: parts.len(),
        });
    }
    if parts[0].is_empty() {
        return Err(ParseError::MissingName);
    }

    Ok(UpgradablePackage {
        name: parts[0].to_string(),
        current_version: parts[1].to_string(),
        new_version: parts[2].to_string(),
    })
}

fn detail_block(lines: &[&str]) -> Result<PackageDetail, ParseError> {
    let mut name = None;
    let mut version = None;
    let mut size = None;
    let mut dependencies = Vec::new();

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Package" if !value.is_empty() => name = Some(value.to_string()),
            "Version" => version = Some(value.to_string()),
            "Size" => size = Some(value.to_string()),
            "Depends" => {
                dependencies = value
                    .split(',')
                    .map(str::trim)
                    .filter(|dep| !dep.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    let name = name.ok_or(ParseError::MissingPackageKey)?;
    Ok(PackageDetail {
        name,
        version,
        size,
        dependencies,
    })
}

fn flush_block(block: &mut Vec<&str>, records: &mut Vec<PackageDetail>) {
    if block.is_empty() {
        return;
    }
    match detail_block(block) {
        Ok(record) => records.push(record),
        Err(e) => trace!(lines = block.len(), error = %e, "Skipping detail block"),
    }
    block.clear();
}

/// Parse `opkg list-installed`: `name - version[ - description]` per line
pub fn parse_installed(text: &str) -> Vec<InstalledPackage> {
    content_lines(text)
        .filter_map(|line| match installed_line(line) {
            Ok(record) => Some(record),
            Err(e) => {
                trace!(line, error = %e, "Skipping installed-list line");
                None
            }
        })
        .collect()
}

/// Parse `opkg list-upgradable`: `name - current - new` per line.
///
/// Lines with fewer than three fields are dropped.
pub fn parse_upgradable(text: &str) -> Vec<UpgradablePackage> {
    content_lines(text)
        .filter_map(|line| match upgradable_line(line) {
            Ok(record) => Some(record),
            Err(e) => {
                trace!(line, error = %e, "Skipping upgradable-list line");
                None
            }
        })
        .collect()
}

/// Parse `opkg info` output: blank-line separated `Key: value` blocks.
///
/// Blocks without a `Package` key are dropped.
pub fn parse_details(text: &str) -> Vec<PackageDetail> {
    let mut records = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in text.lines().map(|line| line.trim_end_matches('\r')) {
        if line.trim().is_empty() {
            flush_block(&mut block, &mut records);
        } else {
            block.push(line);
        }
    }
    flush_block(&mut block, &mut records);

    records
}
