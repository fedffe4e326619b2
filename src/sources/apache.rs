//! Apache archive-index manager.
//!
//! Apache projects publish plain directory listings under
//! `archive.apache.org/dist/<project>/`. Versions are discovered by
//! scraping version-directory names and filename-embedded versions from
//! the listing HTML (including a `binaries/` subdirectory when present).
//! Tarball installs default to directory mode.

use async_trait::async_trait;
use regex::Regex;

use crate::core::template::{self, TemplateVars};
use crate::types::version::{self, Version};
use crate::types::{InstallMode, Package, Platform};

use super::{checksum_urls, fetch_text, Manager, Resolution, SourceError};

#[derive(Debug, Clone)]
pub struct ApacheManager {
    client: reqwest::Client,
    base: String,
}

impl ApacheManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://archive.apache.org/dist".to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn index_url(&self, pkg: &Package) -> Result<String, SourceError> {
        if let Some(url) = pkg.versions_url.as_deref() {
            return Ok(url.trim_end_matches('/').to_string() + "/");
        }
        let repo = pkg
            .repo
            .as_deref()
            .ok_or_else(|| SourceError::Other(format!("package '{}' has no repo", pkg.name)))?;
        Ok(format!("{}/{}/", self.base, repo.trim_matches('/')))
    }

    /// Extract versions from a directory listing: version-named
    /// subdirectories plus versions embedded in file names.
    fn scrape_versions(pkg_name: &str, html: &str) -> Vec<Version> {
        let href = Regex::new(r#"href="([^"?#]+)""#).expect("static regex");
        // Versions embedded in file names; prerelease suffixes only show
        // up as directory names, which the first branch handles.
        let embedded = Regex::new(r"(\d+\.\d+(?:\.\d+)?)").expect("static regex");

        let mut found = Vec::new();
        for cap in href.captures_iter(html) {
            let target = cap[1].trim_end_matches('/');
            if target.contains("://") || target.starts_with('/') || target == ".." {
                continue;
            }

            // A version-named directory ("3.9.6/") or a file with the
            // version embedded ("apache-maven-3.9.6-bin.tar.gz").
            let candidate = if version::parse_semverish(target).is_some() {
                Some(target.to_string())
            } else {
                embedded
                    .captures(target)
                    .map(|c| c[1].to_string())
                    .filter(|v| version::parse_semverish(v).is_some())
            };

            if let Some(v) = candidate {
                found.push(Version::named(pkg_name, &v));
            }
        }
        found.sort_by(|a, b| a.normalized.cmp(&b.normalized));
        found.dedup_by(|a, b| a.normalized == b.normalized);
        found
    }
}

#[async_trait]
impl Manager for ApacheManager {
    fn name(&self) -> &'static str {
        "apache"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, SourceError> {
        let index_url = self.index_url(pkg)?;
        let html = fetch_text(&self.client, &index_url, &Default::default()).await?;
        let mut versions = Self::scrape_versions(&pkg.name, &html);

        // Some projects keep release files one level down.
        if html.contains("href=\"binaries/\"") {
            let binaries_url = format!("{index_url}binaries/");
            if let Ok(sub) = fetch_text(&self.client, &binaries_url, &Default::default()).await {
                versions.extend(Self::scrape_versions(&pkg.name, &sub));
                versions.sort_by(|a, b| a.normalized.cmp(&b.normalized));
                versions.dedup_by(|a, b| a.normalized == b.normalized);
            }
        }

        super::postprocess_versions(pkg, versions, limit)
    }

    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, SourceError> {
        let url_template = pkg.url_template.as_deref().ok_or_else(|| {
            SourceError::Other(format!("package '{}' has no url_template", pkg.name))
        })?;
        let vars = TemplateVars::new(&pkg.name, &version.normalized, &version.tag, platform);
        let download_url = template::render_url(url_template, &vars)?;

        let mut resolution = Resolution::for_url(download_url);
        if let Some(explicit) = pkg.extract {
            resolution.is_archive = explicit;
        }
        // Apache tarballs unpack to a full distribution tree.
        if resolution.is_archive {
            resolution.mode = Some(InstallMode::Directory);
        }

        if !pkg.checksum_file_names().is_empty() {
            let urls = checksum_urls(pkg, version, platform, Some(resolution.download_url.as_str()))?;
            resolution.checksum_url = urls.into_iter().next();
        } else {
            // Apache publishes .sha512 siblings for release artifacts.
            resolution.checksum_url = Some(format!("{}.sha512", resolution.download_url));
        }
        Ok(resolution)
    }
}
