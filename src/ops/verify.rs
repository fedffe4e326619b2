//! Installed-binary verification.
//!
//! Runs a package's `version_command` against the installed binary and
//! parses the reported version with `version_regex` (default: first
//! semver-looking token). Used both by the installer's skip-check and by
//! `check`-style re-verification.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use crate::types::version;

/// Fallback pattern: the first semver-looking token in the output.
const DEFAULT_VERSION_PATTERN: &str = r"(\d+\.\d+(?:\.\d+)?(?:-[0-9A-Za-z.]+)?)";

/// What probing an installed binary found.
#[derive(Debug, Clone)]
pub struct InstalledInfo {
    pub path: PathBuf,
    pub exists: bool,
    /// Version parsed from the command output, if any.
    pub version: Option<String>,
    pub raw_output: String,
}

/// Comparison of an installed binary against an expected version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    Match,
    Mismatch { expected: String, actual: String },
    /// The binary is not on disk.
    Missing,
    /// The binary exists but its version could not be determined.
    Unknown,
}

/// Probe a binary on disk. A missing `version_command` limits the probe
/// to an existence check.
pub async fn probe_installed(
    binary_path: &Path,
    version_command: Option<&str>,
    version_regex: Option<&str>,
) -> Result<InstalledInfo> {
    if !binary_path.is_file() {
        return Ok(InstalledInfo {
            path: binary_path.to_path_buf(),
            exists: false,
            version: None,
            raw_output: String::new(),
        });
    }

    let Some(command) = version_command.filter(|c| !c.is_empty()) else {
        return Ok(InstalledInfo {
            path: binary_path.to_path_buf(),
            exists: true,
            version: None,
            raw_output: String::new(),
        });
    };

    let output = tokio::process::Command::new(binary_path)
        .args(command.split_whitespace())
        .output()
        .await
        .with_context(|| format!("running {} {command}", binary_path.display()))?;

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    if text.trim().is_empty() {
        text = String::from_utf8_lossy(&output.stderr).to_string();
    }

    Ok(InstalledInfo {
        path: binary_path.to_path_buf(),
        exists: true,
        version: parse_version_output(&text, version_regex),
        raw_output: text,
    })
}

/// Pull a version out of command output using the package's regex (first
/// capture group, or whole match) with a semver-shaped fallback.
pub fn parse_version_output(output: &str, version_regex: Option<&str>) -> Option<String> {
    let pattern = version_regex
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_VERSION_PATTERN);
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(output)?;
    let matched = caps.get(1).or_else(|| caps.get(0))?;
    Some(matched.as_str().to_string())
}

/// Compare an expected version against a probe result, using normalized
/// semantic equality.
pub fn compare(expected: &str, installed: &InstalledInfo) -> VersionStatus {
    if !installed.exists {
        return VersionStatus::Missing;
    }
    let Some(actual) = installed.version.as_deref() else {
        return VersionStatus::Unknown;
    };

    let want = version::normalize(expected);
    let have = version::normalize(actual);
    let equal = match (version::parse_semverish(&want), version::parse_semverish(&have)) {
        (Some(a), Some(b)) => a == b,
        _ => want == have,
    };
    if equal {
        VersionStatus::Match
    } else {
        VersionStatus::Mismatch {
            expected: want,
            actual: have,
        }
    }
}
