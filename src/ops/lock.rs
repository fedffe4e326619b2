//! Multi-platform lock generation.
//!
//! Every (package x platform) pair resolves independently on a bounded
//! worker pool; results merge into one mutex-protected [`LockFile`].
//! Failures are per-pair: siblings keep going, and dependencies that end
//! up with zero resolved platforms are pruned before saving.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::constraint::Constraint;
use crate::core::lockfile::{GithubMeta, LockFile, PlatformEntry};
use crate::core::resolver::{self, DiscoveryCache};
use crate::io::checksum::{self, ChecksumSource};
use crate::ops::error::LockError;
use crate::sources::ManagerRegistry;
use crate::types::{Package, Platform};
use crate::ui::Reporter;

#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Lock all common platforms.
    pub all: bool,
    /// Explicit platform list; wins over the existing file's union.
    pub platforms: Vec<Platform>,
    /// Re-resolve platforms that already have entries.
    pub force: bool,
    /// Never stream-download to compute missing digests.
    pub verify_only: bool,
    /// Worker pool size (0 = default).
    pub parallel: usize,
}

/// One failed (package, platform) pair.
#[derive(Debug, Clone)]
pub struct LockFailure {
    pub name: String,
    pub platform: String,
    pub message: String,
}

/// Outcome of a lock run.
#[derive(Debug)]
pub struct LockReport {
    pub lock: LockFile,
    pub failures: Vec<LockFailure>,
    /// Dependencies skipped entirely by the idempotent-update check.
    pub skipped: Vec<String>,
    /// Dependencies pruned because no platform resolved.
    pub pruned: Vec<String>,
}

/// Generate a fresh lock file for `deps`.
pub async fn generate(
    deps: &BTreeMap<String, String>,
    packages: &BTreeMap<String, Package>,
    managers: &ManagerRegistry,
    client: &reqwest::Client,
    reporter: Arc<dyn Reporter>,
    opts: &LockOptions,
) -> Result<LockReport, LockError> {
    let fresh = LockFile::new(&Platform::current());
    run(fresh, deps, packages, managers, client, reporter, opts).await
}

/// Update an existing lock file: fill missing platforms, re-pin changed
/// constraints, preserve unrelated dependencies verbatim.
pub async fn update(
    existing: LockFile,
    deps: &BTreeMap<String, String>,
    packages: &BTreeMap<String, Package>,
    managers: &ManagerRegistry,
    client: &reqwest::Client,
    reporter: Arc<dyn Reporter>,
    opts: &LockOptions,
) -> Result<LockReport, LockError> {
    run(existing, deps, packages, managers, client, reporter, opts).await
}

/// The platform set for a run: `--all` -> common platforms, else the
/// explicit list, else the union already present in the lock, else the
/// host platform.
fn platform_set(existing: &LockFile, opts: &LockOptions) -> Vec<Platform> {
    if opts.all {
        return Platform::common_platforms();
    }
    if !opts.platforms.is_empty() {
        return opts.platforms.clone();
    }
    let union: Vec<Platform> = existing
        .platform_union()
        .iter()
        .filter_map(|s| Platform::parse(s).ok())
        .collect();
    if !union.is_empty() {
        return union;
    }
    vec![Platform::current()]
}

async fn run(
    existing: LockFile,
    deps: &BTreeMap<String, String>,
    packages: &BTreeMap<String, Package>,
    managers: &ManagerRegistry,
    client: &reqwest::Client,
    reporter: Arc<dyn Reporter>,
    opts: &LockOptions,
) -> Result<LockReport, LockError> {
    let platforms = platform_set(&existing, opts);
    let cache = Arc::new(DiscoveryCache::new());
    let cancel = CancellationToken::new();

    let lock = Arc::new(Mutex::new(existing));
    let failures = Arc::new(Mutex::new(Vec::<LockFailure>::new()));
    let wrote = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut skipped = Vec::new();

    let parallel = if opts.parallel == 0 { 4 } else { opts.parallel };
    let semaphore = Arc::new(tokio::sync::Semaphore::new(parallel));
    let mut set = tokio::task::JoinSet::new();

    for (name, constraint_str) in deps {
        let Some(pkg) = packages.get(name).cloned() else {
            failures.lock().expect("failures poisoned").push(LockFailure {
                name: name.clone(),
                platform: "*".to_string(),
                message: format!("unknown package '{name}'"),
            });
            continue;
        };
        let manager = match managers.get_for_package(&pkg) {
            Ok(m) => m,
            Err(e) => {
                failures.lock().expect("failures poisoned").push(LockFailure {
                    name: name.clone(),
                    platform: "*".to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        // Idempotent re-lock: an exact pin that already covers every
        // requested platform is left untouched.
        if !opts.force {
            let parsed = Constraint::parse(constraint_str).ok();
            if let Some(Constraint::Exact(want)) = parsed {
                let guard = lock.lock().expect("lock poisoned");
                if let Some(entry) = guard.dependencies.get(name) {
                    let covered = platforms
                        .iter()
                        .all(|p| entry.platforms.contains_key(&p.to_string()));
                    if entry.version == want && covered {
                        drop(guard);
                        skipped.push(name.clone());
                        continue;
                    }
                }
            }
        }

        // One constraint resolution per package, shared across platforms.
        let version = match resolver::resolve_constraint(
            manager.as_ref(),
            &pkg,
            constraint_str,
            &platforms[0],
            &cache,
        )
        .await
        {
            Ok(v) => v,
            Err(e) => {
                failures.lock().expect("failures poisoned").push(LockFailure {
                    name: name.clone(),
                    platform: "*".to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        for platform in &platforms {
            // Present platforms are kept unless force re-resolves them.
            if !opts.force {
                let guard = lock.lock().expect("lock poisoned");
                let present = guard
                    .dependencies
                    .get(name)
                    .map(|e| {
                        e.version == version.normalized
                            && e.platforms.contains_key(&platform.to_string())
                    })
                    .unwrap_or(false);
                if present {
                    continue;
                }
            }

            let pkg = pkg.clone();
            let manager = manager.clone();
            let version = version.clone();
            let platform = platform.clone();
            let client = client.clone();
            let lock = lock.clone();
            let failures = failures.clone();
            let wrote = wrote.clone();
            let semaphore = semaphore.clone();
            let reporter = reporter.clone();
            let cancel = cancel.clone();
            let verify_only = opts.verify_only;
            let name = name.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if cancel.is_cancelled() {
                    return;
                }
                match resolve_platform_entry(
                    &client,
                    manager.as_ref(),
                    &pkg,
                    &version,
                    &platform,
                    verify_only,
                )
                .await
                {
                    Ok(entry) => {
                        let mut guard = lock.lock().expect("lock poisoned");
                        let dep = guard.dependencies.entry(name.clone()).or_default();
                        dep.version = version.normalized.clone();
                        dep.version_command = pkg.version_command.clone();
                        dep.version_regex = pkg.version_regex.clone();
                        if pkg.manager == "github" {
                            dep.github = pkg.repo.clone().map(|repo| GithubMeta {
                                repo,
                                tag: Some(version.tag.clone()),
                            });
                        }
                        dep.platforms.insert(platform.to_string(), entry);
                        wrote.store(true, std::sync::atomic::Ordering::SeqCst);
                        reporter.done(&name, &version.normalized, &platform.to_string());
                    }
                    Err(message) => {
                        reporter.failed(&name, &version.normalized, &message);
                        failures.lock().expect("failures poisoned").push(LockFailure {
                            name: name.clone(),
                            platform: platform.to_string(),
                            message,
                        });
                    }
                }
            });
        }
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            reporter.error(&format!("lock task panicked: {e}"));
        }
    }

    let mut lock = Arc::try_unwrap(lock)
        .map_err(|_| LockError::Other("lock tasks still running".to_string()))?
        .into_inner()
        .expect("lock poisoned");
    let failures = Arc::try_unwrap(failures)
        .map_err(|_| LockError::Other("failure list still shared".to_string()))?
        .into_inner()
        .expect("failures poisoned");

    // Only prune entries we were actually asked to produce; unrelated
    // dependencies survive untouched.
    let pruned: Vec<String> = lock
        .dependencies
        .iter()
        .filter(|(name, entry)| deps.contains_key(*name) && entry.platforms.is_empty())
        .map(|(name, _)| name.clone())
        .collect();
    for name in &pruned {
        lock.dependencies.remove(name);
    }

    if wrote.load(std::sync::atomic::Ordering::SeqCst) || !pruned.is_empty() {
        lock.refresh_generated();
    }

    Ok(LockReport {
        lock,
        failures,
        skipped,
        pruned,
    })
}

/// Resolve one (package, platform) pair into a lock entry, acquiring a
/// digest from the source, checksum files, or a streaming hash.
async fn resolve_platform_entry(
    client: &reqwest::Client,
    manager: &dyn crate::sources::Manager,
    pkg: &Package,
    version: &crate::types::Version,
    platform: &Platform,
    verify_only: bool,
) -> Result<PlatformEntry, String> {
    let resolution = manager
        .resolve(pkg, version, platform)
        .await
        .map_err(|e| e.to_string())?;

    let asset = resolution
        .asset_name
        .clone()
        .or_else(|| {
            resolution
                .download_url
                .rsplit('/')
                .next()
                .map(str::to_string)
        })
        .unwrap_or_default();

    let mut urls =
        crate::sources::checksum_urls(pkg, version, platform, Some(resolution.download_url.as_str()))
            .unwrap_or_default();
    if urls.is_empty() {
        urls.extend(resolution.checksum_url.clone());
    }
    let source = ChecksumSource {
        known: resolution.checksum.clone(),
        urls,
        names: pkg.checksum_file_names(),
        expr: pkg.checksum_expr.clone(),
        asset,
        version: version.normalized.clone(),
    };

    let mut size = resolution.size;
    let digest = match checksum::discover(client, &source, platform).await {
        Ok(Some(digest)) => digest,
        Ok(None) | Err(checksum::ChecksumError::NoEntry { .. }) if !verify_only => {
            let (hex, streamed) = checksum::stream_sha256(client, &resolution.download_url)
                .await
                .map_err(|e| e.to_string())?;
            size.get_or_insert(streamed);
            format!("sha256:{hex}")
        }
        Ok(None) => return Err("no checksum source and streaming disabled".to_string()),
        Err(e) => return Err(e.to_string()),
    };

    Ok(PlatformEntry {
        url: resolution.download_url,
        checksum: digest,
        size,
        archive: pkg.extract.unwrap_or(resolution.is_archive),
        binary_path: pkg
            .binary_path
            .clone()
            .or(resolution.binary_path),
    })
}
