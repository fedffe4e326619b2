//! The shared constraint resolver used by the installer and the lock
//! generator.
//!
//! Resolution is deterministic for a given discovery snapshot: the
//! version list is sorted descending and the first satisfying entry
//! wins. Discovery results are memoized per (manager, package, platform)
//! for the life of the process; there is no persistent discovery cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::OnceCell;

use crate::core::constraint::{Constraint, ConstraintError};
use crate::sources::{Manager, SourceError};
use crate::types::version::Version;
use crate::types::{Package, Platform};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Per-process, compute-once discovery memoization.
#[derive(Default)]
pub struct DiscoveryCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<Vec<Version>>>>>>,
}

impl std::fmt::Debug for DiscoveryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .cells
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("DiscoveryCache").field("keys", &keys).finish()
    }
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover versions through the cache; concurrent callers for the
    /// same key share one network fetch.
    pub async fn discover(
        &self,
        manager: &dyn Manager,
        pkg: &Package,
        platform: &Platform,
        limit: usize,
    ) -> Result<Arc<Vec<Version>>, SourceError> {
        let key = format!("{}/{}/{platform}/{limit}", manager.name(), pkg.name);
        let cell = {
            let mut cells = self.cells.lock().expect("discovery cache poisoned");
            cells.entry(key).or_default().clone()
        };
        cell.get_or_try_init(|| async {
            let versions = manager.discover_versions(pkg, platform, limit).await?;
            Ok(Arc::new(versions))
        })
        .await
        .map(Arc::clone)
    }
}

/// Resolve a constraint to one concrete version.
///
/// An exact constraint matching a discovered version returns exactly that
/// entry; an exact constraint against a source with no discovery at all
/// (direct URLs) is taken at face value. An empty discovery otherwise
/// falls back to `fallback_version` when the package declares one.
pub async fn resolve_constraint(
    manager: &dyn Manager,
    pkg: &Package,
    constraint: &str,
    platform: &Platform,
    cache: &DiscoveryCache,
) -> Result<Version, ResolveError> {
    let parsed = Constraint::parse(constraint)?;

    let versions = match cache.discover(manager, pkg, platform, 0).await {
        Ok(versions) => versions,
        Err(e) => {
            if let Some(fallback) = pkg.fallback_version.as_deref() {
                tracing::warn!(
                    "version discovery for {} failed ({e}); using fallback_version {fallback}",
                    pkg.name
                );
                return Ok(Version::named(&pkg.name, fallback));
            }
            return Err(e.into());
        }
    };

    if versions.is_empty() {
        if let Constraint::Exact(want) = &parsed {
            return Ok(Version::named(&pkg.name, want));
        }
        if let Some(fallback) = pkg.fallback_version.as_deref() {
            return Ok(Version::named(&pkg.name, fallback));
        }
        return Err(SourceError::NoVersions {
            package: pkg.name.clone(),
        }
        .into());
    }

    match parsed.select(&versions) {
        Some(version) => Ok(version.clone()),
        None => Err(SourceError::VersionNotFound {
            package: pkg.name.clone(),
            requested: constraint.to_string(),
            suggestions: versions
                .iter()
                .take(5)
                .map(|v| v.normalized.clone())
                .collect(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed version list with a fetch counter.
    struct FakeManager {
        tags: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl FakeManager {
        fn new(tags: Vec<&'static str>) -> Self {
            Self {
                tags,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Manager for FakeManager {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn discover_versions(
            &self,
            pkg: &Package,
            _platform: &Platform,
            limit: usize,
        ) -> Result<Vec<Version>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let versions = self.tags.iter().map(|t| Version::new(t)).collect();
            crate::sources::postprocess_versions(pkg, versions, limit)
        }

        async fn resolve(
            &self,
            _pkg: &Package,
            _version: &Version,
            _platform: &Platform,
        ) -> Result<crate::sources::Resolution, SourceError> {
            unimplemented!("not used in resolver tests")
        }
    }

    fn pkg() -> Package {
        Package::new("tool", "fake")
    }

    fn platform() -> Platform {
        Platform::new("linux", "amd64")
    }

    #[tokio::test]
    async fn test_exact_match_in_list() {
        let manager = FakeManager::new(vec!["v1.7.1", "v1.7.0", "v1.6.0"]);
        let cache = DiscoveryCache::new();
        let got = resolve_constraint(&manager, &pkg(), "1.7.0", &platform(), &cache)
            .await
            .unwrap();
        assert_eq!(got.normalized, "1.7.0");
    }

    #[tokio::test]
    async fn test_exact_missing_reports_suggestions() {
        let manager = FakeManager::new(vec!["v1.7.1", "v1.7.0"]);
        let cache = DiscoveryCache::new();
        let err = resolve_constraint(&manager, &pkg(), "9.9.9", &platform(), &cache)
            .await
            .unwrap_err();
        match err {
            ResolveError::Source(SourceError::VersionNotFound { suggestions, .. }) => {
                assert!(suggestions.contains(&"1.7.1".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_discovery_accepts_exact() {
        let manager = FakeManager::new(vec![]);
        let cache = DiscoveryCache::new();
        let got = resolve_constraint(&manager, &pkg(), "2.0.0", &platform(), &cache)
            .await
            .unwrap();
        assert_eq!(got.normalized, "2.0.0");
    }

    #[tokio::test]
    async fn test_empty_discovery_without_exact_is_no_versions() {
        let manager = FakeManager::new(vec![]);
        let cache = DiscoveryCache::new();
        let err = resolve_constraint(&manager, &pkg(), "latest", &platform(), &cache)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Source(SourceError::NoVersions { .. })
        ));
    }

    #[tokio::test]
    async fn test_fallback_version_on_empty() {
        let manager = FakeManager::new(vec![]);
        let cache = DiscoveryCache::new();
        let mut package = pkg();
        package.fallback_version = Some("3.1.4".to_string());
        let got = resolve_constraint(&manager, &package, "latest", &platform(), &cache)
            .await
            .unwrap();
        assert_eq!(got.normalized, "3.1.4");
    }

    #[tokio::test]
    async fn test_discovery_memoized() {
        let manager = FakeManager::new(vec!["v2.0.0", "v1.0.0"]);
        let cache = DiscoveryCache::new();
        for _ in 0..3 {
            resolve_constraint(&manager, &pkg(), "latest", &platform(), &cache)
                .await
                .unwrap();
        }
        assert_eq!(manager.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_range_resolution() {
        let manager = FakeManager::new(vec!["3.0.1", "2.4.0", "2.4.0-rc.1", "2.3.5", "1.9.0"]);
        let cache = DiscoveryCache::new();
        let got = resolve_constraint(&manager, &pkg(), ">=2.0 <3.0", &platform(), &cache)
            .await
            .unwrap();
        assert_eq!(got.normalized, "2.4.0");
    }
}
