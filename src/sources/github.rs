//! GitHub releases manager.
//!
//! Discovers versions from the repository releases API, preserving the
//! literal tag so URL templates can use either `{{version}}` (normalized)
//! or `{{tag}}` (as published). Release asset metadata enriches the
//! resolution with sizes, asset ids, and digests when the API provides
//! them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::expr;
use crate::core::template::{self, TemplateVars};
use crate::io::checksum;
use crate::types::version::Version;
use crate::types::{Package, Platform};

use super::{
    asset, checksum_urls, fetch_json, fetch_text, Manager, Resolution, SourceError,
};

/// Default environment variable holding the API token.
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

const PER_PAGE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
    /// `"sha256:<hex>"` when the API reports one.
    #[serde(default)]
    pub digest: Option<String>,
}

/// Rate limit status for reporting.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

#[derive(Debug, Clone)]
pub struct GithubManager {
    client: reqwest::Client,
    api_base: String,
    download_base: String,
}

impl GithubManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_base: "https://api.github.com".to_string(),
            download_base: "https://github.com".to_string(),
        }
    }

    /// Point at a different API endpoint (tests, GitHub Enterprise).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_download_base(mut self, base: impl Into<String>) -> Self {
        self.download_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn headers(&self, pkg: Option<&Package>) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::from([(
            "Accept".to_string(),
            "application/vnd.github+json".to_string(),
        )]);
        let env_name = pkg
            .and_then(|p| p.token_env.clone())
            .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());
        if let Ok(token) = std::env::var(&env_name) {
            if !token.is_empty() {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
        }
        headers
    }

    fn repo<'a>(&self, pkg: &'a Package) -> Result<&'a str, SourceError> {
        pkg.repo
            .as_deref()
            .ok_or_else(|| SourceError::Other(format!("package '{}' has no repo", pkg.name)))
    }

    async fn fetch_releases(
        &self,
        pkg: &Package,
        limit: usize,
    ) -> Result<Vec<Release>, SourceError> {
        let repo = self.repo(pkg)?;
        let want = if limit == 0 { usize::MAX } else { limit };
        let mut releases: Vec<Release> = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/repos/{}/releases?per_page={}&page={}",
                self.api_base, repo, PER_PAGE, page
            );
            let batch: Vec<Release> =
                fetch_json(&self.client, &url, &self.headers(Some(pkg))).await?;
            let batch_len = batch.len();
            releases.extend(batch);
            if batch_len < PER_PAGE || releases.len() >= want {
                break;
            }
            page += 1;
        }
        Ok(releases)
    }

    async fn fetch_release_by_tag(
        &self,
        pkg: &Package,
        tag: &str,
    ) -> Result<Option<Release>, SourceError> {
        let repo = self.repo(pkg)?;
        let url = format!("{}/repos/{}/releases/tags/{}", self.api_base, repo, tag);
        match fetch_json(&self.client, &url, &self.headers(Some(pkg))).await {
            Ok(release) => Ok(Some(release)),
            Err(SourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current rate limit status, for reporting.
    pub async fn rate_limit(&self) -> Result<RateLimit, SourceError> {
        #[derive(Deserialize)]
        struct Outer {
            rate: RateLimit,
        }
        let url = format!("{}/rate_limit", self.api_base);
        let outer: Outer = fetch_json(&self.client, &url, &self.headers(None)).await?;
        Ok(outer.rate)
    }

    /// Login of the authenticated user, when a token is configured.
    pub async fn whoami(&self) -> Result<Option<String>, SourceError> {
        if !self.headers(None).contains_key("Authorization") {
            return Ok(None);
        }
        #[derive(Deserialize)]
        struct User {
            login: String,
        }
        let url = format!("{}/user", self.api_base);
        let user: User = fetch_json(&self.client, &url, &self.headers(None)).await?;
        Ok(Some(user.login))
    }

    fn default_url_template(&self, repo: &str) -> String {
        format!(
            "{}/{}/releases/download/{{{{tag}}}}/{{{{asset}}}}",
            self.download_base, repo
        )
    }
}

#[async_trait]
impl Manager for GithubManager {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, SourceError> {
        let releases = self.fetch_releases(pkg, limit).await?;
        let versions = releases
            .into_iter()
            .map(|r| {
                let mut v = Version::named(&pkg.name, &r.tag_name)
                    .with_tag(r.tag_name.clone())
                    .with_published(r.published_at);
                v.prerelease = v.prerelease || r.prerelease;
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
        let repo = self.repo(pkg)?;
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

        let release = self.fetch_release_by_tag(pkg, &version.tag).await?;

        // An assets_expr picks (url, checksum) straight from the release
        // asset list.
        if let (Some(expr_src), Some(release)) = (pkg.assets_expr.as_deref(), release.as_ref()) {
            let json = serde_json::to_value(&release.assets)
                .map_err(|e| SourceError::Parse(e.to_string()))?;
            let (download_url, digest) = expr::eval_assets_expr(
                expr_src,
                &json,
                &platform.os,
                &platform.arch,
                &version.normalized,
            )?;
            template::ensure_http_url(&download_url)?;
            let mut resolution = Resolution::for_url(download_url);
            resolution.checksum = digest.map(|d| checksum::canonicalize(&d));
            return Ok(resolution);
        }

        let url_template = pkg
            .url_template
            .clone()
            .unwrap_or_else(|| self.default_url_template(repo));
        let download_url = template::render_url(&url_template, &vars)?;

        let mut resolution = Resolution::for_url(download_url);
        resolution.asset_name = asset_name.clone();
        if let Some(explicit) = pkg.extract {
            resolution.is_archive = explicit;
        }

        // Enrich from release asset metadata when the asset is listed.
        if let (Some(name), Some(release)) = (&asset_name, &release) {
            if let Some(found) = release.assets.iter().find(|a| &a.name == name) {
                resolution.size = Some(found.size);
                resolution.asset_id = Some(found.id);
                if let Some(digest) = &found.digest {
                    resolution.checksum = Some(checksum::canonicalize(digest));
                }
            }
        }

        if resolution.checksum.is_none() && !pkg.checksum_file_names().is_empty() {
            let urls = checksum_urls(pkg, version, platform, Some(resolution.download_url.as_str()))?;
            resolution.checksum_url = urls.into_iter().next();
        }

        Ok(resolution)
    }

    async fn get_checksums(
        &self,
        pkg: &Package,
        version: &Version,
    ) -> Result<BTreeMap<String, String>, SourceError> {
        let mut out = BTreeMap::new();

        if let Some(release) = self.fetch_release_by_tag(pkg, &version.tag).await? {
            for asset in &release.assets {
                if let Some(digest) = &asset.digest {
                    let canonical = checksum::canonicalize(digest);
                    let hex = canonical.split(':').next_back().unwrap_or(&canonical);
                    out.insert(asset.name.clone(), hex.to_string());
                }
            }
        }
        if !out.is_empty() {
            return Ok(out);
        }

        // Fall back to published checksum files.
        let platform = Platform::current();
        let vars = TemplateVars::new(&pkg.name, &version.normalized, &version.tag, &platform);
        for name in pkg.checksum_file_names() {
            let rendered = template::render(&name, &vars)?;
            if !rendered.starts_with("http") {
                continue;
            }
            let body = fetch_text(&self.client, &rendered, &self.headers(Some(pkg))).await?;
            out.extend(checksum::parse_checksum_table(&body));
        }
        Ok(out)
    }
}
