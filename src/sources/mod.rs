//! Source managers: a uniform contract over heterogeneous release
//! ecosystems.
//!
//! Each manager implements discovery (list versions), resolution (exact
//! version + platform -> download URL and metadata), and checksum lookup
//! for one ecosystem. The [`ManagerRegistry`] maps a package's `manager`
//! field to the implementation; registration is explicit at startup, not
//! a side effect.

pub mod apache;
pub mod asset;
pub mod direct;
pub mod github;
pub mod gitlab;
pub mod golang;
pub mod maven;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::constraint::ConstraintError;
use crate::core::expr::{self, ExprError};
use crate::core::template::{self, TemplateError, TemplateVars};
use crate::types::version::{self, Version};
use crate::types::{InstallMode, Package, Platform};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited (reset: {reset:?})")]
    RateLimited { reset: Option<u64> },

    #[error("version '{requested}' not found for {package} (known: {suggestions:?})")]
    VersionNotFound {
        package: String,
        requested: String,
        suggestions: Vec<String>,
    },

    #[error("no versions discovered for {package}")]
    NoVersions { package: String },

    #[error("no asset matches platform {platform} for {package}")]
    NoAssetMatch { package: String, platform: String },

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown manager '{0}'")]
    UnknownManager(String),

    #[error("{0}")]
    Other(String),
}

/// The concrete (url, checksum, metadata) produced for one
/// (package, version, platform).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub download_url: String,
    /// Checksum file URL, when the source publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_url: Option<String>,
    /// Digest already known from the source, `"algo:hex"` or bare hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub is_archive: bool,
    /// Path of the binary inside the extracted tree, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
    /// Install mode override decided by the manager (e.g. Apache tarballs
    /// flip to directory mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<InstallMode>,
    /// Source-specific metadata: the matched asset name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_name: Option<String>,
    /// Source-specific metadata: the asset id (GitHub).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<u64>,
}

impl Resolution {
    pub fn for_url(url: impl Into<String>) -> Self {
        let download_url = url.into();
        let is_archive = crate::io::extract::looks_like_archive(&download_url);
        Self {
            download_url,
            is_archive,
            ..Self::default()
        }
    }
}

/// A source-backend implementation.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Registry key matched against `Package::manager`.
    fn name(&self) -> &'static str;

    /// List available versions, newest first. `limit == 0` means no limit.
    async fn discover_versions(
        &self,
        pkg: &Package,
        platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, SourceError>;

    /// Resolve one exact version on one platform to a download URL and
    /// metadata.
    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, SourceError>;

    /// Fetch the published checksum table for a version:
    /// asset name -> hex digest.
    async fn get_checksums(
        &self,
        pkg: &Package,
        version: &Version,
    ) -> Result<BTreeMap<String, String>, SourceError> {
        let urls = checksum_urls(pkg, version, &Platform::current(), None)?;
        let mut out = BTreeMap::new();
        for url in urls {
            let body = fetch_text(&default_client(), &url, &BTreeMap::new()).await?;
            for (asset, digest) in crate::io::checksum::parse_checksum_table(&body) {
                out.insert(asset, digest);
            }
        }
        Ok(out)
    }

    /// Probe an installed binary and report what is actually on disk.
    async fn verify(
        &self,
        binary_path: &Path,
        pkg: &Package,
    ) -> Result<crate::ops::verify::InstalledInfo, SourceError> {
        crate::ops::verify::probe_installed(
            binary_path,
            pkg.version_command.as_deref(),
            pkg.version_regex.as_deref(),
        )
        .await
        .map_err(|e| SourceError::Other(e.to_string()))
    }
}

/// Name -> manager map, built once at startup.
#[derive(Clone)]
pub struct ManagerRegistry {
    managers: BTreeMap<&'static str, Arc<dyn Manager>>,
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerRegistry")
            .field("managers", &self.managers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ManagerRegistry {
    pub fn builder() -> ManagerRegistryBuilder {
        ManagerRegistryBuilder {
            managers: BTreeMap::new(),
        }
    }

    /// All six standard managers over a shared HTTP client.
    pub fn standard(client: reqwest::Client) -> Self {
        Self::builder()
            .with(github::GithubManager::new(client.clone()))
            .with(gitlab::GitlabManager::new(client.clone()))
            .with(apache::ApacheManager::new(client.clone()))
            .with(maven::MavenManager::new(client.clone()))
            .with(direct::DirectManager::new(client.clone()))
            .with(golang::GoManager::new(client))
            .build()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Manager>, SourceError> {
        self.managers
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::UnknownManager(name.to_string()))
    }

    /// Look up the manager named by a package's `manager` field.
    pub fn get_for_package(&self, pkg: &Package) -> Result<Arc<dyn Manager>, SourceError> {
        self.get(&pkg.manager)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.managers.keys().copied().collect()
    }
}

pub struct ManagerRegistryBuilder {
    managers: BTreeMap<&'static str, Arc<dyn Manager>>,
}

impl ManagerRegistryBuilder {
    pub fn with<M: Manager + 'static>(mut self, manager: M) -> Self {
        self.managers.insert(manager.name(), Arc::new(manager));
        self
    }

    pub fn build(self) -> ManagerRegistry {
        ManagerRegistry {
            managers: self.managers,
        }
    }
}

/// Shared discovery post-processing: apply `version_expr`, keep only
/// semver-like entries, sort descending, apply the limit.
pub fn postprocess_versions(
    pkg: &Package,
    mut versions: Vec<Version>,
    limit: usize,
) -> Result<Vec<Version>, SourceError> {
    if let Some(expr) = pkg.version_expr.as_deref() {
        versions = expr::eval_version_expr(expr, &versions)?;
    }
    let mut versions = version::filter_to_valid_semver(versions);
    version::sort_versions_desc(&mut versions);
    if limit > 0 && versions.len() > limit {
        versions.truncate(limit);
    }
    Ok(versions)
}

/// Template the package's checksum file references into absolute URLs,
/// joining relative names against the download URL's directory when one
/// is available.
pub fn checksum_urls(
    pkg: &Package,
    version: &Version,
    platform: &Platform,
    download_url: Option<&str>,
) -> Result<Vec<String>, SourceError> {
    let vars = TemplateVars::new(&pkg.name, &version.normalized, &version.tag, platform);
    let mut urls = Vec::new();
    for name in pkg.checksum_file_names() {
        let rendered = template::render(&name, &vars)?;
        let url = if rendered.starts_with("http://") || rendered.starts_with("https://") {
            rendered
        } else if let Some(base) = download_url {
            template::join_against_url_dir(base, &rendered)?
        } else {
            return Err(SourceError::Other(format!(
                "checksum file '{rendered}' is relative but no download URL is known"
            )));
        };
        urls.push(url);
    }
    Ok(urls)
}

pub(crate) fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(crate::USER_AGENT)
        .build()
        .expect("default reqwest client")
}

/// GET a URL and return the body text, mapping status codes onto the
/// source error taxonomy.
pub(crate) async fn fetch_text(
    client: &reqwest::Client,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<String, SourceError> {
    let response = send_get(client, url, headers).await?;
    Ok(response.text().await?)
}

/// GET a URL and deserialize the JSON body.
pub(crate) async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<T, SourceError> {
    let response = send_get(client, url, headers).await?;
    Ok(response.json().await?)
}

pub(crate) async fn send_get(
    client: &reqwest::Client,
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<reqwest::Response, SourceError> {
    let mut request = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
    for (key, value) in headers {
        request = request.header(key.as_str(), value.as_str());
    }
    let response = request.send().await?;
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let rate_limited = status.as_u16() == 429
        || (status.as_u16() == 403
            && response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .map(|v| v == "0")
                .unwrap_or(false));

    if rate_limited {
        let reset = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(SourceError::RateLimited { reset });
    }

    match status.as_u16() {
        401 | 403 => Err(SourceError::Unauthorized(url.to_string())),
        404 => Err(SourceError::NotFound(url.to_string())),
        code => Err(SourceError::HttpStatus {
            status: code,
            url: url.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ManagerRegistry::standard(default_client());
        assert!(registry.get("github").is_ok());
        assert!(registry.get("go").is_ok());
        assert!(matches!(
            registry.get("npm"),
            Err(SourceError::UnknownManager(_))
        ));

        let pkg = Package::new("jq", "github");
        assert_eq!(registry.get_for_package(&pkg).unwrap().name(), "github");
    }

    #[test]
    fn test_postprocess_versions_orders_and_limits() {
        let pkg = Package::new("x", "github");
        let versions = vec![
            Version::new("1.0.0"),
            Version::new("not-a-version"),
            Version::new("2.0.0"),
            Version::new("1.5.0"),
        ];
        let got = postprocess_versions(&pkg, versions, 2).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].normalized, "2.0.0");
        assert_eq!(got[1].normalized, "1.5.0");
    }

    #[test]
    fn test_checksum_urls_relative_joined() {
        let mut pkg = Package::new("helm", "url");
        pkg.checksum_file = Some("helm-v{{version}}-{{os}}-{{arch}}.tar.gz.sha256sum".to_string());
        let version = Version::new("3.14.0");
        let platform = Platform::new("linux", "amd64");
        let urls = checksum_urls(
            &pkg,
            &version,
            &platform,
            Some("https://get.helm.sh/helm-v3.14.0-linux-amd64.tar.gz"),
        )
        .unwrap();
        assert_eq!(
            urls,
            vec!["https://get.helm.sh/helm-v3.14.0-linux-amd64.tar.gz.sha256sum"]
        );
    }

    #[test]
    fn test_checksum_urls_relative_without_base_fails() {
        let mut pkg = Package::new("x", "url");
        pkg.checksum_file = Some("sums.txt".to_string());
        let err = checksum_urls(&pkg, &Version::new("1.0.0"), &Platform::new("linux", "amd64"), None);
        assert!(err.is_err());
    }
}
