//! Direct-URL manager.
//!
//! No release API: the download URL is pure templating. Version discovery
//! is optional, driven by `versions_url` (plain text, JSON, or anything a
//! `versions_expr` can pick apart). Packages without discovery rely on an
//! exact version in the constraint or a `fallback_version`.

use async_trait::async_trait;

use crate::core::expr::{self, DiscoveredVersion};
use crate::core::template::{self, TemplateVars};
use crate::io::checksum;
use crate::types::version::Version;
use crate::types::{Package, Platform};

use super::{asset, checksum_urls, fetch_text, Manager, Resolution, SourceError};

#[derive(Debug, Clone)]
pub struct DirectManager {
    client: reqwest::Client,
}

impl DirectManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch and interpret `versions_url`. With a `versions_expr` the body
    /// is parsed as JSON (falling back to a string) and handed to the
    /// expression; without one, the body is split on whitespace and each
    /// token treated as a version.
    async fn discover_raw(
        &self,
        pkg: &Package,
        platform: &Platform,
    ) -> Result<Vec<DiscoveredVersion>, SourceError> {
        let Some(versions_url) = pkg.versions_url.as_deref() else {
            return Ok(Vec::new());
        };
        let body = fetch_text(&self.client, versions_url, &Default::default()).await?;

        if let Some(expr_src) = pkg.versions_expr.as_deref() {
            let json: serde_json::Value = serde_json::from_str(&body)
                .unwrap_or_else(|_| serde_json::Value::String(body.clone()));
            return Ok(expr::eval_versions_expr(
                expr_src,
                &json,
                &platform.os,
                &platform.arch,
            )?);
        }

        Ok(body
            .split_whitespace()
            .map(|token| DiscoveredVersion {
                version: token.to_string(),
                url: None,
                checksum: None,
                asset: None,
            })
            .collect())
    }
}

#[async_trait]
impl Manager for DirectManager {
    fn name(&self) -> &'static str {
        "url"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, SourceError> {
        let raw = self.discover_raw(pkg, platform).await?;
        let versions = raw
            .into_iter()
            .map(|d| Version::named(&pkg.name, &d.version))
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

        let mut resolution = if let Some(url_template) = pkg.url_template.as_deref() {
            Resolution::for_url(template::render_url(url_template, &vars)?)
        } else {
            // No template: the discovery expression must have produced a
            // per-version URL.
            let raw = self.discover_raw(pkg, platform).await?;
            let found = raw
                .into_iter()
                .find(|d| Version::named(&pkg.name, &d.version).normalized == version.normalized)
                .ok_or_else(|| SourceError::VersionNotFound {
                    package: pkg.name.clone(),
                    requested: version.normalized.clone(),
                    suggestions: Vec::new(),
                })?;
            let url = found.url.ok_or_else(|| {
                SourceError::Other(format!(
                    "package '{}' has neither url_template nor a discovered url",
                    pkg.name
                ))
            })?;
            template::ensure_http_url(&url)?;
            let mut r = Resolution::for_url(url);
            r.checksum = found.checksum.map(|c| checksum::canonicalize(&c));
            r
        };

        resolution.asset_name = asset_name;
        if let Some(explicit) = pkg.extract {
            resolution.is_archive = explicit;
        }
        if resolution.checksum.is_none() && !pkg.checksum_file_names().is_empty() {
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
    async fn test_discover_plain_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stable.txt")
            .with_status(200)
            .with_body("v1.29.1")
            .create_async()
            .await;

        let manager = DirectManager::new(reqwest::Client::new());
        let mut pkg = Package::new("kubectl", "url");
        pkg.versions_url = Some(format!("{}/stable.txt", server.url()));

        let versions = manager
            .discover_versions(&pkg, &Platform::new("linux", "amd64"), 0)
            .await
            .unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].normalized, "1.29.1");
    }

    #[tokio::test]
    async fn test_discover_with_versions_expr() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/releases.json")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "releases": [
                        { "version": "2.1.0", "url": "https://example.com/tool-2.1.0" },
                        { "version": "2.0.0", "url": "https://example.com/tool-2.0.0" },
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let manager = DirectManager::new(reqwest::Client::new());
        let mut pkg = Package::new("tool", "url");
        pkg.versions_url = Some(format!("{}/releases.json", server.url()));
        pkg.versions_expr = Some("json.releases".to_string());

        let versions = manager
            .discover_versions(&pkg, &Platform::new("linux", "amd64"), 0)
            .await
            .unwrap();
        assert_eq!(versions[0].normalized, "2.1.0");

        // Without a url_template the discovered URL is used.
        let resolution = manager
            .resolve(&pkg, &versions[0], &Platform::new("linux", "amd64"))
            .await
            .unwrap();
        assert_eq!(resolution.download_url, "https://example.com/tool-2.1.0");
    }

    #[tokio::test]
    async fn test_resolve_pure_template() {
        let manager = DirectManager::new(reqwest::Client::new());
        let mut pkg = Package::new("helm", "url");
        pkg.url_template =
            Some("https://get.helm.sh/helm-v{{version}}-{{os}}-{{arch}}.tar.gz".to_string());
        pkg.checksum_file =
            Some("helm-v{{version}}-{{os}}-{{arch}}.tar.gz.sha256sum".to_string());

        let version = Version::new("3.14.0");
        let resolution = manager
            .resolve(&pkg, &version, &Platform::new("darwin", "arm64"))
            .await
            .unwrap();
        assert_eq!(
            resolution.download_url,
            "https://get.helm.sh/helm-v3.14.0-darwin-arm64.tar.gz"
        );
        assert!(resolution.is_archive);
        assert_eq!(
            resolution.checksum_url.as_deref(),
            Some("https://get.helm.sh/helm-v3.14.0-darwin-arm64.tar.gz.sha256sum")
        );
    }
}
