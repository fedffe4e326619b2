//! Lock file model for reproducible installs.
//!
//! The lock file (`deps-lock.yaml`) pins exact versions and checksums for
//! every (dependency x platform) pair. Saving is deterministic:
//! dependencies and platforms are `BTreeMap`s, so keys serialize sorted,
//! and repeated saves of the same state are byte-identical apart from the
//! `generated` stamp (which callers control).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("lock entry '{0}' has no resolved platforms")]
    EmptyEntry(String),
}

/// Current lock file format version.
pub const LOCK_FORMAT_VERSION: &str = "1.0";

/// One resolved (dependency, platform) pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEntry {
    pub url: String,
    /// Canonical `"algo:hex"`, lowercase hex.
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub archive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
}

/// Source metadata recorded for GitHub-backed dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubMeta {
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// One locked dependency across its resolved platforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_regex: Option<String>,
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubMeta>,
}

/// The lock file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub version: String,
    /// ISO-8601 generation timestamp.
    pub generated: String,
    /// Platform of the host that generated the file.
    pub current_platform: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, LockEntry>,
}

impl LockFile {
    pub fn new(current_platform: &crate::types::Platform) -> Self {
        Self {
            version: LOCK_FORMAT_VERSION.to_string(),
            generated: now_iso8601(),
            current_platform: current_platform.to_string(),
            dependencies: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yml::from_str(&content)?)
    }

    /// Serialize to YAML with deterministic key order.
    pub fn to_yaml(&self) -> Result<String, LockfileError> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Save atomically: write to a temp sibling, then rename over `path`.
    ///
    /// Fails if any entry would violate the lock invariants (empty
    /// version or zero platforms); call [`clean_failed`](Self::clean_failed)
    /// first to prune.
    pub fn save(&self, path: &Path) -> Result<(), LockfileError> {
        for (name, entry) in &self.dependencies {
            if entry.version.is_empty() || entry.platforms.is_empty() {
                return Err(LockfileError::EmptyEntry(name.clone()));
            }
        }

        let content = self.to_yaml()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.persist(path).map_err(|e| LockfileError::Io(e.error))?;
        Ok(())
    }

    /// Drop dependencies whose platform map ended up empty.
    pub fn clean_failed(&mut self) -> Vec<String> {
        let dropped: Vec<String> = self
            .dependencies
            .iter()
            .filter(|(_, e)| e.platforms.is_empty() || e.version.is_empty())
            .map(|(n, _)| n.clone())
            .collect();
        for name in &dropped {
            self.dependencies.remove(name);
        }
        dropped
    }

    /// Insert or replace one platform pin under a dependency.
    pub fn upsert_platform(
        &mut self,
        name: &str,
        version: &str,
        platform: &crate::types::Platform,
        entry: PlatformEntry,
    ) {
        let dep = self.dependencies.entry(name.to_string()).or_default();
        dep.version = version.to_string();
        dep.platforms.insert(platform.to_string(), entry);
    }

    /// The union of platform strings across all dependencies.
    pub fn platform_union(&self) -> Vec<String> {
        let mut set: Vec<String> = self
            .dependencies
            .values()
            .flat_map(|e| e.platforms.keys().cloned())
            .collect();
        set.sort();
        set.dedup();
        set
    }

    pub fn refresh_generated(&mut self) {
        self.generated = now_iso8601();
    }
}

fn now_iso8601() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
