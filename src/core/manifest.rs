//! Manifest data model: dependencies, registry overrides, settings.
//!
//! Schema validation and config-file discovery belong to the CLI layer;
//! this module only defines the shapes the core consumes and the
//! precedence rules for merging (built-in registry < user registry,
//! settings < environment overrides).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Package;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("unknown package '{0}': not in the registry")]
    UnknownPackage(String),
}

/// Install and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bin_dir: PathBuf,
    pub app_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// When set, temp dirs are created here and preserved after runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,
    /// Platform override as "os-arch"; empty means host detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Worker pool size for batch installs and lock fan-out.
    pub parallel: usize,
    pub skip_verify: bool,
    pub strict_checksum: bool,
    pub skip_checksum: bool,
    pub force: bool,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bin_dir: crate::default_bin_dir(),
            app_dir: crate::default_app_dir(),
            cache_dir: crate::default_cache_dir(),
            tmp_dir: None,
            platform: None,
            parallel: 4,
            skip_verify: false,
            strict_checksum: true,
            skip_checksum: false,
            force: false,
            debug: false,
        }
    }
}

impl Settings {
    /// Apply `BIN_DIR` / `APP_DIR` environment overrides. Tokens and other
    /// env are read once at startup by the caller, not here.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os("BIN_DIR").filter(|v| !v.is_empty()) {
            self.bin_dir = PathBuf::from(dir);
        }
        if let Some(dir) = std::env::var_os("APP_DIR").filter(|v| !v.is_empty()) {
            self.app_dir = PathBuf::from(dir);
        }
        self
    }

    /// The platform installs should target: the configured override, or
    /// host detection.
    pub fn target_platform(&self) -> crate::types::Platform {
        self.platform
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| crate::types::Platform::parse(s).ok())
            .unwrap_or_else(crate::types::Platform::current)
    }
}

/// The manifest (`deps.yaml`): requested dependencies, registry
/// overrides, and settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// name -> constraint string
    pub dependencies: BTreeMap<String, String>,
    /// name -> package definition, overriding built-ins by name
    pub registry: BTreeMap<String, Package>,
    pub settings: Settings,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut manifest: Manifest = serde_yml::from_str(content)?;
        for (name, pkg) in &mut manifest.registry {
            if pkg.name.is_empty() {
                pkg.name = name.clone();
            }
        }
        Ok(manifest)
    }

    /// The effective registry: built-in defaults shadowed by user entries.
    pub fn effective_registry(&self) -> BTreeMap<String, Package> {
        let mut merged = super::defaults::builtin_registry();
        for (name, pkg) in &self.registry {
            merged.insert(name.clone(), pkg.clone());
        }
        merged
    }

    /// Look up a package by name in the effective registry.
    pub fn find_package(&self, name: &str) -> Result<Package, ManifestError> {
        self.effective_registry()
            .remove(name)
            .ok_or_else(|| ManifestError::UnknownPackage(name.to_string()))
    }
}
