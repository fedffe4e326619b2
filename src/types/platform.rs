//! Platform model: normalized (os, arch) pairs.
//!
//! Canonical form is `"os-arch"`, e.g. `linux-amd64` or `darwin-arm64`.
//! Source managers receive an explicit [`Platform`]; there is no hidden
//! process-global override.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid platform string '{0}', expected 'os-arch'")]
    Invalid(String),
}

/// A normalized operating-system / architecture pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

/// (os, arch) pairs excluded from [`Platform::common_platforms`].
///
/// Windows on ARM binaries are still rare enough that locking them by
/// default produces mostly dead entries.
const UNCOMMON: &[(&str, &str)] = &[("windows", "arm64")];

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: normalize_os(&os.into()),
            arch: normalize_arch(&arch.into()),
        }
    }

    /// Detect the host platform from the running process.
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Parse a canonical `"os-arch"` string.
    pub fn parse(s: &str) -> Result<Self, PlatformError> {
        let trimmed = s.trim();
        let (os, arch) = trimmed
            .split_once('-')
            .ok_or_else(|| PlatformError::Invalid(trimmed.to_string()))?;
        if os.is_empty() || arch.is_empty() {
            return Err(PlatformError::Invalid(trimmed.to_string()));
        }
        Ok(Self::new(os, arch))
    }

    /// Parse a list of `"os-arch"` strings, rejecting the whole list on the
    /// first invalid entry.
    pub fn parse_list<S: AsRef<str>>(items: &[S]) -> Result<Vec<Self>, PlatformError> {
        items.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    /// The cross-product of {linux, darwin, windows} x {amd64, arm64},
    /// minus combinations that do not exist in practice.
    pub fn common_platforms() -> Vec<Self> {
        let mut out = Vec::new();
        for os in ["linux", "darwin", "windows"] {
            for arch in ["amd64", "arm64"] {
                if UNCOMMON.contains(&(os, arch)) {
                    continue;
                }
                out.push(Self::new(os, arch));
            }
        }
        out
    }

    /// Match this platform against a pattern glob such as `"linux-amd64"`,
    /// `"darwin-*"`, or a comma-union like `"darwin-*,windows-*"`.
    pub fn matches_glob(&self, pattern: &str) -> bool {
        let canonical = self.to_string();
        pattern.split(',').map(str::trim).any(|part| {
            glob::Pattern::new(part)
                .map(|p| p.matches(&canonical))
                .unwrap_or(false)
        })
    }

    /// `true` for Windows targets, which need `.exe` suffixes and cannot
    /// use symlinks.
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn normalize_os(os: &str) -> String {
    match os.trim().to_lowercase().as_str() {
        "macos" | "osx" | "mac" => "darwin".to_string(),
        "win" | "win32" | "win64" => "windows".to_string(),
        other => other.to_string(),
    }
}

fn normalize_arch(arch: &str) -> String {
    match arch.trim().to_lowercase().as_str() {
        "x86_64" | "x64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        "x86" | "i386" | "i686" => "386".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let p = Platform::parse("linux-amd64").unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.arch, "amd64");
    }

    #[test]
    fn test_parse_normalizes_aliases() {
        assert_eq!(Platform::parse("macos-x86_64").unwrap().to_string(), "darwin-amd64");
        assert_eq!(Platform::parse("linux-aarch64").unwrap().to_string(), "linux-arm64");
        assert_eq!(Platform::parse("win64-x64").unwrap().to_string(), "windows-amd64");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Platform::parse("linux").is_err());
        assert!(Platform::parse("-amd64").is_err());
        assert!(Platform::parse("linux-").is_err());
    }

    #[test]
    fn test_display_roundtrip_for_common_platforms() {
        for p in Platform::common_platforms() {
            assert_eq!(Platform::parse(&p.to_string()).unwrap(), p);
        }
    }

    #[test]
    fn test_common_platforms_excludes_windows_arm64() {
        let all = Platform::common_platforms();
        assert_eq!(all.len(), 5);
        assert!(!all.contains(&Platform::new("windows", "arm64")));
        assert!(all.contains(&Platform::new("linux", "amd64")));
        assert!(all.contains(&Platform::new("darwin", "arm64")));
    }

    #[test]
    fn test_matches_glob() {
        let p = Platform::new("darwin", "arm64");
        assert!(p.matches_glob("darwin-arm64"));
        assert!(p.matches_glob("darwin-*"));
        assert!(p.matches_glob("linux-*,darwin-*"));
        assert!(!p.matches_glob("linux-*"));
        assert!(!p.matches_glob("darwin-amd64"));
    }

    #[test]
    fn test_parse_list() {
        let list = Platform::parse_list(&["linux-amd64", "darwin-arm64"]).unwrap();
        assert_eq!(list.len(), 2);
        assert!(Platform::parse_list(&["linux-amd64", "bogus"]).is_err());
    }
}
