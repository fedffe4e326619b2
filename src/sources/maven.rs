//! Maven Central manager.
//!
//! The `repo` field is a `group:artifact` coordinate. Versions come from
//! the artifact's `maven-metadata.xml`; downloads resolve to the standard
//! repository layout, with `.sha1`/`.sha256` sibling files providing
//! checksums.

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;

use crate::core::template::{self, TemplateVars};
use crate::io::checksum;
use crate::types::version::Version;
use crate::types::{Package, Platform};

use super::{fetch_text, Manager, Resolution, SourceError};

#[derive(Debug, Clone)]
pub struct MavenManager {
    client: reqwest::Client,
    base: String,
}

impl MavenManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base: "https://repo1.maven.org/maven2".to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Split `group:artifact` into the repository path and artifact id.
    fn coordinate<'a>(&self, pkg: &'a Package) -> Result<(String, &'a str), SourceError> {
        let repo = pkg
            .repo
            .as_deref()
            .ok_or_else(|| SourceError::Other(format!("package '{}' has no repo", pkg.name)))?;
        let (group, artifact) = repo.split_once(':').ok_or_else(|| {
            SourceError::Parse(format!(
                "maven repo '{repo}' must be 'group:artifact'"
            ))
        })?;
        Ok((group.replace('.', "/"), artifact))
    }

    fn artifact_dir(&self, group_path: &str, artifact: &str) -> String {
        format!("{}/{}/{}", self.base, group_path, artifact)
    }

    fn parse_metadata_versions(pkg_name: &str, xml: &str) -> Vec<Version> {
        let re = Regex::new(r"<version>\s*([^<]+?)\s*</version>").expect("static regex");
        re.captures_iter(xml)
            .map(|c| Version::named(pkg_name, &c[1]))
            .collect()
    }
}

#[async_trait]
impl Manager for MavenManager {
    fn name(&self) -> &'static str {
        "maven"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        _platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, SourceError> {
        let (group_path, artifact) = self.coordinate(pkg)?;
        let url = format!(
            "{}/maven-metadata.xml",
            self.artifact_dir(&group_path, artifact)
        );
        let xml = fetch_text(&self.client, &url, &Default::default()).await?;
        let versions = Self::parse_metadata_versions(&pkg.name, &xml);
        super::postprocess_versions(pkg, versions, limit)
    }

    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, SourceError> {
        let download_url = if let Some(url_template) = pkg.url_template.as_deref() {
            let vars = TemplateVars::new(&pkg.name, &version.normalized, &version.tag, platform);
            template::render_url(url_template, &vars)?
        } else {
            let (group_path, artifact) = self.coordinate(pkg)?;
            format!(
                "{}/{}/{}-{}.jar",
                self.artifact_dir(&group_path, artifact),
                version.normalized,
                artifact,
                version.normalized
            )
        };
        template::ensure_http_url(&download_url)?;

        let mut resolution = Resolution::for_url(download_url);
        // Tool jars run via `java -jar`; install the file itself unless
        // the package opts into extraction.
        resolution.is_archive = pkg.extract.unwrap_or(false);
        // Every artifact on Central has a .sha1 sibling; .sha256 exists
        // only for newer uploads.
        resolution.checksum_url = Some(format!("{}.sha1", resolution.download_url));
        Ok(resolution)
    }

    async fn get_checksums(
        &self,
        pkg: &Package,
        version: &Version,
    ) -> Result<BTreeMap<String, String>, SourceError> {
        let resolution = self
            .resolve(pkg, version, &Platform::current())
            .await?;
        let mut out = BTreeMap::new();
        for suffix in [".sha256", ".sha1"] {
            let url = format!("{}{}", resolution.download_url, suffix);
            match fetch_text(&self.client, &url, &Default::default()).await {
                Ok(body) => {
                    if let Some(hex) = checksum::first_hex_token(&body) {
                        let file = resolution
                            .download_url
                            .rsplit('/')
                            .next()
                            .unwrap_or_default()
                            .to_string();
                        out.insert(file, hex);
                        break;
                    }
                }
                Err(SourceError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r"
<metadata>
  <groupId>com.google.googlejavaformat</groupId>
  <artifactId>google-java-format</artifactId>
  <versioning>
    <latest>1.19.2</latest>
    <versions>
      <version>1.18.1</version>
      <version>1.19.1</version>
      <version>1.19.2</version>
    </versions>
  </versioning>
</metadata>
";

    fn gjf() -> Package {
        let mut pkg = Package::new("google-java-format", "maven");
        pkg.repo = Some("com.google.googlejavaformat:google-java-format".to_string());
        pkg
    }

    #[test]
    fn test_parse_metadata() {
        let versions = MavenManager::parse_metadata_versions("google-java-format", METADATA);
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].normalized, "1.18.1");
    }

    #[tokio::test]
    async fn test_discover_against_mock() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/com/google/googlejavaformat/google-java-format/maven-metadata.xml",
            )
            .with_status(200)
            .with_body(METADATA)
            .create_async()
            .await;

        let manager = MavenManager::new(reqwest::Client::new()).with_base(server.url());
        let versions = manager
            .discover_versions(&gjf(), &Platform::new("linux", "amd64"), 0)
            .await
            .unwrap();
        assert_eq!(versions[0].normalized, "1.19.2");
    }

    #[tokio::test]
    async fn test_resolve_coordinate_layout() {
        let manager = MavenManager::new(reqwest::Client::new());
        let resolution = manager
            .resolve(&gjf(), &Version::new("1.19.2"), &Platform::new("linux", "amd64"))
            .await
            .unwrap();
        assert_eq!(
            resolution.download_url,
            "https://repo1.maven.org/maven2/com/google/googlejavaformat/google-java-format/1.19.2/google-java-format-1.19.2.jar"
        );
        assert_eq!(
            resolution.checksum_url.as_deref(),
            Some("https://repo1.maven.org/maven2/com/google/googlejavaformat/google-java-format/1.19.2/google-java-format-1.19.2.jar.sha1")
        );
        assert!(!resolution.is_archive);
    }

    #[test]
    fn test_bad_coordinate() {
        let manager = MavenManager::new(reqwest::Client::new());
        let mut pkg = Package::new("x", "maven");
        pkg.repo = Some("no-colon-here".to_string());
        assert!(manager.coordinate(&pkg).is_err());
    }
}
