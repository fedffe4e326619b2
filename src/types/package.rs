//! Package registry entries.
//!
//! A [`Package`] is a declarative description of where a tool's binaries
//! live and how to install them. Entries are immutable once loaded; the
//! manager named by `manager` interprets the source locator fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a package lands on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// A single executable placed in the bin dir.
    #[default]
    Binary,
    /// The whole extracted tree moved under the app dir, with symlinks
    /// into the bin dir.
    Directory,
}

/// A named installable tool with a declarative source description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Package {
    pub name: String,
    /// Selects the source manager ("github", "gitlab", "apache", "maven",
    /// "url", "go").
    pub manager: String,

    // Source locators
    /// `owner/repo` for forge managers, a coordinate for others.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions_expr: Option<String>,
    /// Filter/transform applied to the discovered version list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_expr: Option<String>,

    // Asset mapping: platform-glob -> asset name template.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub asset_patterns: BTreeMap<String, String>,

    // Checksum configuration
    /// Comma-separated logical checksum file names/templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_expr: Option<String>,

    // Verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_regex: Option<String>,

    // Post-download shaping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_name: Option<String>,
    /// Plain name, relative path, or an expression over {os, arch, version}.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
    pub pre_installed: bool,
    /// Tri-state: None = decide from the URL suffix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<bool>,
    /// Ordered pipeline expressions, each optionally prefixed
    /// `"platform-glob:"`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_process: Vec<String>,
    pub mode: InstallMode,
    /// Globs under the app dir to symlink into the bin dir (directory mode).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,
    /// Template for a wrapper script written as `bin_dir/<name>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper_script: Option<String>,
    /// Version to assume when discovery fails or returns nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_version: Option<String>,

    /// Environment variable holding the auth token for this package's
    /// source (defaults to the manager's own, e.g. GITHUB_TOKEN).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl Package {
    pub fn new(name: impl Into<String>, manager: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manager: manager.into(),
            ..Self::default()
        }
    }

    /// The file name the installed binary should have, defaulting to the
    /// package name (plus `.exe` on Windows).
    pub fn binary_file_name(&self, windows: bool) -> String {
        let base = self.binary_name.clone().unwrap_or_else(|| self.name.clone());
        if windows && !base.ends_with(".exe") {
            format!("{base}.exe")
        } else {
            base
        }
    }

    /// Logical checksum file names, split from the comma-separated field.
    pub fn checksum_file_names(&self) -> Vec<String> {
        self.checksum_file
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_file_name_defaults() {
        let pkg = Package::new("jq", "github");
        assert_eq!(pkg.binary_file_name(false), "jq");
        assert_eq!(pkg.binary_file_name(true), "jq.exe");

        let mut named = Package::new("golangci-lint", "github");
        named.binary_name = Some("golangci-lint".to_string());
        assert_eq!(named.binary_file_name(true), "golangci-lint.exe");
    }

    #[test]
    fn test_checksum_file_names_split() {
        let mut pkg = Package::new("helm", "github");
        assert!(pkg.checksum_file_names().is_empty());

        pkg.checksum_file = Some("sums, sums-extra ".to_string());
        assert_eq!(pkg.checksum_file_names(), vec!["sums", "sums-extra"]);
    }

    #[test]
    fn test_yaml_roundtrip_minimal() {
        let yaml = r"
name: jq
manager: github
repo: jqlang/jq
asset_patterns:
  linux-amd64: jq-linux-amd64
";
        let pkg: Package = serde_yml::from_str(yaml).unwrap();
        assert_eq!(pkg.name, "jq");
        assert_eq!(pkg.manager, "github");
        assert_eq!(pkg.mode, InstallMode::Binary);
        assert_eq!(pkg.asset_patterns.len(), 1);
    }
}
