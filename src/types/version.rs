//! Version model: normalization, semver classification, ordering.
//!
//! Upstream tags come in many shapes (`v1.7.1`, `jq-1.7.1`, `release-2.4`,
//! `go1.22.0`). Everything is normalized before comparison; ordering is
//! SemVer 2 precedence, descending, with prereleases sorting after their
//! stable base.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Substrings that mark a tag as a prerelease, checked case-insensitively.
const PRERELEASE_MARKERS: &[&str] = &["alpha", "beta", "rc", "snapshot", "dev"];

/// A discovered version of a package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Version {
    /// Raw version string as reported by the source.
    pub version: String,
    /// Literal tag (e.g. the git tag), preserved for URL templating.
    pub tag: String,
    /// Commit sha, when the source provides one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha: String,
    /// Publication timestamp, when the source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Whether this version is a prerelease.
    pub prerelease: bool,
    /// Normalized form used for comparison and lock entries.
    pub normalized: String,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Build a version from a raw tag, normalizing and classifying it.
    pub fn new(raw: &str) -> Self {
        Self::named("", raw)
    }

    /// Build a version from a raw tag, also stripping a leading
    /// `{package}-` prefix during normalization.
    pub fn named(package: &str, raw: &str) -> Self {
        let normalized = normalize_named(package, raw);
        let parsed = parse_semverish(&normalized);
        let prerelease = classify_prerelease(raw)
            || parsed
                .as_ref()
                .map(|v| !v.pre.is_empty())
                .unwrap_or(false);
        let (major, minor, patch) = parsed
            .as_ref()
            .map(|v| (v.major, v.minor, v.patch))
            .unwrap_or((0, 0, 0));

        Self {
            version: raw.trim().to_string(),
            tag: raw.trim().to_string(),
            sha: String::new(),
            published: None,
            prerelease,
            normalized,
            major,
            minor,
            patch,
        }
    }

    /// Replace the literal tag (e.g. GitHub keeps `v1.7.1` while the
    /// normalized version is `1.7.1`).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = sha.into();
        self
    }

    pub fn with_published(mut self, published: Option<DateTime<Utc>>) -> Self {
        self.published = published;
        self
    }

    /// Semver parse of the normalized form, if it is semver-like.
    pub fn semver(&self) -> Option<semver::Version> {
        parse_semverish(&self.normalized)
    }
}

/// Strip decorative prefixes and suffixes from a version string.
///
/// Removes leading `v`/`V`, `release-`, `version-`, and a trailing
/// `-release`, then trims whitespace. Idempotent.
pub fn normalize(v: &str) -> String {
    normalize_named("", v)
}

/// [`normalize`], additionally stripping a leading `{package}-` prefix.
pub fn normalize_named(package: &str, v: &str) -> String {
    let mut s = v.trim();

    let mut changed = true;
    while changed {
        changed = false;
        if !package.is_empty() {
            for sep in ['-', '_'] {
                let prefix = format!("{package}{sep}");
                if s.len() > prefix.len() && s.to_lowercase().starts_with(&prefix.to_lowercase()) {
                    s = &s[prefix.len()..];
                    changed = true;
                }
            }
        }
        for prefix in ["release-", "version-"] {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest;
                changed = true;
            }
        }
        // Only strip a leading v when a digit follows, so "vault" survives.
        if (s.starts_with('v') || s.starts_with('V'))
            && s[1..].starts_with(|c: char| c.is_ascii_digit())
        {
            s = &s[1..];
            changed = true;
        }
    }

    s.strip_suffix("-release").unwrap_or(s).trim().to_string()
}

/// Whether the normalized form parses as semver-like:
/// MAJOR.MINOR with optional PATCH, prerelease, and build metadata.
pub fn is_valid_semver(v: &str) -> bool {
    parse_semverish(&normalize(v)).is_some()
}

/// Whether a tag names a prerelease: contains a known marker
/// (alpha/beta/rc/snapshot/dev) or carries a semver prerelease segment.
pub fn classify_prerelease(tag: &str) -> bool {
    let lower = tag.to_lowercase();
    if PRERELEASE_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    parse_semverish(&normalize(tag))
        .map(|v| !v.pre.is_empty())
        .unwrap_or(false)
}

/// Parse a normalized version, tolerating a missing patch component
/// (`1.7` parses as `1.7.0`).
pub fn parse_semverish(normalized: &str) -> Option<semver::Version> {
    let s = normalized.trim();
    if s.is_empty() || !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    if let Ok(v) = semver::Version::parse(s) {
        return Some(v);
    }

    // MAJOR.MINOR[-pre][+build] without a patch component.
    let (core, rest) = match s.find(['-', '+']) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    };
    let dots = core.chars().filter(|c| *c == '.').count();
    let padded = match dots {
        0 => format!("{core}.0.0{rest}"),
        1 => format!("{core}.0{rest}"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}

/// Sort a version list descending by SemVer 2 precedence. Entries that do
/// not parse sort last, ordered lexicographically for stability.
pub fn sort_versions_desc(versions: &mut [Version]) {
    versions.sort_by(|a, b| match (a.semver(), b.semver()) {
        (Some(va), Some(vb)) => vb.cmp(&va),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.normalized.cmp(&a.normalized),
    });
}

/// Drop entries whose normalized form is not semver-like.
pub fn filter_to_valid_semver(versions: Vec<Version>) -> Vec<Version> {
    versions
        .into_iter()
        .filter(|v| parse_semverish(&v.normalized).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefixes() {
        assert_eq!(normalize("v1.7.1"), "1.7.1");
        assert_eq!(normalize("V2.0"), "2.0");
        assert_eq!(normalize("release-3.9.6"), "3.9.6");
        assert_eq!(normalize("version-1.2.3"), "1.2.3");
        assert_eq!(normalize("  1.0.0 "), "1.0.0");
    }

    #[test]
    fn test_normalize_named_strips_package_prefix() {
        assert_eq!(normalize_named("jq", "jq-1.7.1"), "1.7.1");
        assert_eq!(normalize_named("helm", "helm-v3.14.0"), "3.14.0");
        assert_eq!(normalize_named("jq", "1.7.1"), "1.7.1");
    }

    #[test]
    fn test_normalize_trailing_release() {
        assert_eq!(normalize("1.2.0-release"), "1.2.0");
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in ["v1.7.1", "release-v2.0.0", "1.0", "weird-tag"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "normalize not idempotent for {raw}");
        }
    }

    #[test]
    fn test_normalize_keeps_non_version_words() {
        assert_eq!(normalize("vault"), "vault");
    }

    #[test]
    fn test_is_valid_semver() {
        assert!(is_valid_semver("1.7.1"));
        assert!(is_valid_semver("v1.7"));
        assert!(is_valid_semver("2.0.0-rc.1"));
        assert!(is_valid_semver("1.2.3+build.5"));
        assert!(!is_valid_semver("latest"));
        assert!(!is_valid_semver("not-a-version"));
    }

    #[test]
    fn test_classify_prerelease() {
        assert!(classify_prerelease("1.0.0-rc.1"));
        assert!(classify_prerelease("2.0.0-beta"));
        assert!(classify_prerelease("v3.0.0-SNAPSHOT"));
        assert!(classify_prerelease("1.0.0-alpha.2"));
        assert!(!classify_prerelease("1.0.0"));
        assert!(!classify_prerelease("v2.4.0"));
    }

    #[test]
    fn test_missing_patch_parses() {
        let v = parse_semverish("1.7").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 7, 0));
    }

    #[test]
    fn test_sort_descending_with_prereleases() {
        let mut versions: Vec<Version> = ["2.4.0-rc.1", "1.9.0", "3.0.1", "2.4.0", "2.3.5"]
            .iter()
            .map(|s| Version::new(s))
            .collect();
        sort_versions_desc(&mut versions);
        let order: Vec<&str> = versions.iter().map(|v| v.normalized.as_str()).collect();
        assert_eq!(order, vec!["3.0.1", "2.4.0", "2.4.0-rc.1", "2.3.5", "1.9.0"]);
    }

    #[test]
    fn test_version_new_fields() {
        let v = Version::new("v1.7.1");
        assert_eq!(v.normalized, "1.7.1");
        assert_eq!(v.tag, "v1.7.1");
        assert_eq!((v.major, v.minor, v.patch), (1, 7, 1));
        assert!(!v.prerelease);
    }

    #[test]
    fn test_filter_to_valid_semver() {
        let versions = vec![
            Version::new("1.0.0"),
            Version::new("latest"),
            Version::new("v2.1"),
        ];
        let kept = filter_to_valid_semver(versions);
        assert_eq!(kept.len(), 2);
    }
}
