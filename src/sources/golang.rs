//! Go toolchain manager.
//!
//! Go's public download index (`/dl/?mode=json`) lists every release with
//! per-file os/arch, size, and sha256, so no external checksum file is
//! needed. Toolchain archives install in directory mode.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::version::Version;
use crate::types::{InstallMode, Package, Platform};

use super::{fetch_json, Manager, Resolution, SourceError};

#[derive(Debug, Clone, Deserialize)]
struct GoRelease {
    version: String,
    #[serde(default)]
    stable: bool,
    #[serde(default)]
    files: Vec<GoFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct GoFile {
    filename: String,
    #[serde(default)]
    os: String,
    #[serde(default)]
    arch: String,
    #[serde(default)]
    sha256: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    kind: String,
}

#[derive(Debug, Clone)]
pub struct GoManager {
    client: reqwest::Client,
    base: String,
}

impl GoManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://go.dev".to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_index(&self) -> Result<Vec<GoRelease>, SourceError> {
        let url = format!("{}/dl/?mode=json&include=all", self.base);
        fetch_json(&self.client, &url, &Default::default()).await
    }

    /// `go1.23rc1` -> `1.23-rc1` so the index's prerelease naming parses
    /// as semver.
    fn to_version(release: &GoRelease) -> Version {
        let raw = release.version.strip_prefix("go").unwrap_or(&release.version);
        let re = regex::Regex::new(r"^(\d+\.\d+(?:\.\d+)?)(rc|beta)(\d+)$").expect("static regex");
        let rewritten = re.replace(raw, "$1-$2$3").into_owned();
        let mut v = Version::new(&rewritten).with_tag(release.version.clone());
        v.prerelease = v.prerelease || !release.stable;
        v
    }
}

#[async_trait]
impl Manager for GoManager {
    fn name(&self) -> &'static str {
        "go"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, SourceError> {
        let releases = self.fetch_index().await?;
        let versions = releases.iter().map(Self::to_version).collect();
        super::postprocess_versions(pkg, versions, limit)
    }

    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, SourceError> {
        let releases = self.fetch_index().await?;
        let release = releases
            .iter()
            .find(|r| Self::to_version(r).normalized == version.normalized)
            .ok_or_else(|| SourceError::VersionNotFound {
                package: pkg.name.clone(),
                requested: version.normalized.clone(),
                suggestions: releases
                    .iter()
                    .take(5)
                    .map(|r| Self::to_version(r).normalized)
                    .collect(),
            })?;

        let file = release
            .files
            .iter()
            .find(|f| f.kind == "archive" && f.os == platform.os && f.arch == platform.arch)
            .ok_or_else(|| SourceError::NoAssetMatch {
                package: pkg.name.clone(),
                platform: platform.to_string(),
            })?;

        let mut resolution = Resolution::for_url(format!("{}/dl/{}", self.base, file.filename));
        resolution.is_archive = true;
        resolution.mode = Some(InstallMode::Directory);
        resolution.checksum = Some(format!("sha256:{}", file.sha256.to_lowercase()));
        resolution.size = Some(file.size);
        resolution.asset_name = Some(file.filename.clone());
        Ok(resolution)
    }

    async fn get_checksums(
        &self,
        pkg: &Package,
        version: &Version,
    ) -> Result<BTreeMap<String, String>, SourceError> {
        let releases = self.fetch_index().await?;
        let release = releases
            .iter()
            .find(|r| Self::to_version(r).normalized == version.normalized)
            .ok_or_else(|| SourceError::VersionNotFound {
                package: pkg.name.clone(),
                requested: version.normalized.clone(),
                suggestions: Vec::new(),
            })?;
        Ok(release
            .files
            .iter()
            .filter(|f| !f.sha256.is_empty())
            .map(|f| (f.filename.clone(), f.sha256.to_lowercase()))
            .collect())
    }
}
