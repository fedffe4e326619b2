//! GitLab releases manager.
//!
//! Mirrors the GitHub manager against the GitLab REST surface. The
//! project path is URL-encoded into the API route; release asset links
//! provide download URLs when no `url_template` is configured.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::template::{self, TemplateVars};
use crate::types::version::Version;
use crate::types::{Package, Platform};

use super::{asset, checksum_urls, fetch_json, Manager, Resolution, SourceError};

/// Default environment variable holding the API token.
pub const DEFAULT_TOKEN_ENV: &str = "GITLAB_TOKEN";

#[derive(Debug, Clone, Deserialize)]
struct GitlabRelease {
    tag_name: String,
    #[serde(default)]
    released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    upcoming_release: bool,
    #[serde(default)]
    assets: GitlabAssets,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GitlabAssets {
    #[serde(default)]
    links: Vec<GitlabAssetLink>,
}

#[derive(Debug, Clone, Deserialize)]
struct GitlabAssetLink {
    name: String,
    #[serde(default)]
    direct_asset_url: Option<String>,
    url: String,
}

#[derive(Debug, Clone)]
pub struct GitlabManager {
    client: reqwest::Client,
    base: String,
}

impl GitlabManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://gitlab.com".to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn headers(&self, pkg: Option<&Package>) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        let env_name = pkg
            .and_then(|p| p.token_env.clone())
            .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());
        if let Ok(token) = std::env::var(&env_name) {
            if !token.is_empty() {
                headers.insert("PRIVATE-TOKEN".to_string(), token);
            }
        }
        headers
    }

    fn repo<'a>(&self, pkg: &'a Package) -> Result<&'a str, SourceError> {
        pkg.repo
            .as_deref()
            .ok_or_else(|| SourceError::Other(format!("package '{}' has no repo", pkg.name)))
    }

    fn releases_url(&self, repo: &str) -> String {
        let encoded = repo.replace('/', "%2F");
        format!("{}/api/v4/projects/{}/releases", self.base, encoded)
    }

    async fn fetch_releases(&self, pkg: &Package) -> Result<Vec<GitlabRelease>, SourceError> {
        let url = self.releases_url(self.repo(pkg)?);
        fetch_json(&self.client, &url, &self.headers(Some(pkg))).await
    }
}

#[async_trait]
impl Manager for GitlabManager {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, SourceError> {
        let releases = self.fetch_releases(pkg).await?;
        let versions = releases
            .into_iter()
            .map(|r| {
                let mut v = Version::named(&pkg.name, &r.tag_name)
                    .with_tag(r.tag_name.clone())
                    .with_published(r.released_at);
                v.prerelease = v.prerelease || r.upcoming_release;
                v
            })
            .collect();
        super::postprocess_versions(pkg, versions, limit)
    }

    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, SourceError> {
        let mut vars = TemplateVars::new(&pkg.name, &version.normalized, &version.tag, platform);

        let asset_name = match asset::match_asset_pattern(&pkg.asset_patterns, platform) {
            Some((_, template)) => Some(template::render(template, &vars)?),
            None if pkg.asset_patterns.is_empty() => None,
            None => {
                return Err(SourceError::NoAssetMatch {
                    package: pkg.name.clone(),
                    platform: platform.to_string(),
                })
            }
        };
        if let Some(name) = &asset_name {
            vars = vars.with_asset(name.clone());
        }

        let download_url = if let Some(url_template) = pkg.url_template.as_deref() {
            template::render_url(url_template, &vars)?
        } else {
            // No template: find the release asset link by name.
            let wanted = asset_name.clone().ok_or_else(|| SourceError::NoAssetMatch {
                package: pkg.name.clone(),
                platform: platform.to_string(),
            })?;
            let releases = self.fetch_releases(pkg).await?;
            let release = releases
                .into_iter()
                .find(|r| {
                    Version::named(&pkg.name, &r.tag_name).normalized == version.normalized
                })
                .ok_or_else(|| SourceError::VersionNotFound {
                    package: pkg.name.clone(),
                    requested: version.normalized.clone(),
                    suggestions: Vec::new(),
                })?;
            release
                .assets
                .links
                .iter()
                .find(|l| l.name == wanted)
                .map(|l| l.direct_asset_url.clone().unwrap_or_else(|| l.url.clone()))
                .ok_or_else(|| SourceError::NoAssetMatch {
                    package: pkg.name.clone(),
                    platform: platform.to_string(),
                })?
        };
        template::ensure_http_url(&download_url)?;

        let mut resolution = Resolution::for_url(download_url);
        resolution.asset_name = asset_name;
        if let Some(explicit) = pkg.extract {
            resolution.is_archive = explicit;
        }
        if !pkg.checksum_file_names().is_empty() {
            let urls = checksum_urls(pkg, version, platform, Some(resolution.download_url.as_str()))?;
            resolution.checksum_url = urls.into_iter().next();
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover_versions() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/gitlab-org%2Fgitlab-runner/releases")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!([
                    { "tag_name": "v16.9.0", "released_at": "2024-02-22T00:00:00Z" },
                    { "tag_name": "v16.8.1", "upcoming_release": false },
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let manager = GitlabManager::new(reqwest::Client::new()).with_base(server.url());
        let mut pkg = Package::new("gitlab-runner", "gitlab");
        pkg.repo = Some("gitlab-org/gitlab-runner".to_string());

        let versions = manager
            .discover_versions(&pkg, &Platform::new("linux", "amd64"), 0)
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].normalized, "16.9.0");
        assert_eq!(versions[0].tag, "v16.9.0");
    }

    #[tokio::test]
    async fn test_resolve_with_template() {
        let manager = GitlabManager::new(reqwest::Client::new());
        let mut pkg = Package::new("gitlab-runner", "gitlab");
        pkg.repo = Some("gitlab-org/gitlab-runner".to_string());
        pkg.url_template = Some(
            "https://gitlab-runner-downloads.s3.amazonaws.com/v{{version}}/binaries/gitlab-runner-{{os}}-{{arch}}"
                .to_string(),
        );

        let version = Version::new("v16.9.0");
        let resolution = manager
            .resolve(&pkg, &version, &Platform::new("linux", "amd64"))
            .await
            .unwrap();
        assert_eq!(
            resolution.download_url,
            "https://gitlab-runner-downloads.s3.amazonaws.com/v16.9.0/binaries/gitlab-runner-linux-amd64"
        );
        assert!(!resolution.is_archive);
    }
}
