//! The install pipeline.
//!
//! Per tool: resolve the constraint, skip if the installed binary already
//! reports the resolved version, download with digest verification,
//! extract or place directly, run the post-processing pipeline in its
//! sandbox, finalize (binary placement, symlinks, wrapper scripts), and
//! re-verify. Batch installs fan out over a bounded pool; one tool's
//! failure never aborts its siblings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::core::manifest::Settings;
use crate::core::resolver::{self, DiscoveryCache};
use crate::core::template;
use crate::io::checksum::{self, ChecksumSource};
use crate::io::download::DownloadRequest;
use crate::io::extract;
use crate::ops::error::InstallError;
use crate::ops::verify::{self, VersionStatus};
use crate::pipeline::{self, Sandbox};
use crate::sources::{ManagerRegistry, Resolution};
use crate::types::version::Version;
use crate::types::{InstallMode, Package, Platform};
use crate::ui::Reporter;

/// Outcome of a plugin hook for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook installed the package itself.
    Handled,
    /// Continue with the normal pipeline.
    Pass,
}

/// External install handlers consulted before the normal pipeline.
pub trait InstallHook: Send + Sync {
    fn handle(&self, pkg: &Package) -> HookOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    ForcedInstalled,
    AlreadyInstalled,
    Failed,
}

/// Everything a caller needs to report one tool's install.
#[derive(Debug, Clone)]
pub struct InstallResult {
    pub name: String,
    pub version: String,
    pub status: InstallStatus,
    /// Post-install verification outcome, when a version_command exists.
    pub version_status: Option<VersionStatus>,
    pub binary_path: Option<PathBuf>,
    pub duration: Duration,
    /// Canonical digest of the downloaded artifact.
    pub checksum: Option<String>,
    pub download_size: u64,
    pub message: Option<String>,
}

impl InstallResult {
    fn failed(name: &str, version: &str, message: String, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            status: InstallStatus::Failed,
            version_status: None,
            binary_path: None,
            duration: started.elapsed(),
            checksum: None,
            download_size: 0,
            message: Some(message),
        }
    }
}

/// Orchestrates installs against one settings/registry pair.
#[derive(Clone)]
pub struct Installer {
    managers: ManagerRegistry,
    packages: BTreeMap<String, Package>,
    settings: Settings,
    client: Client,
    reporter: Arc<dyn Reporter>,
    cache: Arc<DiscoveryCache>,
    cancel: CancellationToken,
    hooks: Vec<Arc<dyn InstallHook>>,
}

impl Installer {
    pub fn new(
        managers: ManagerRegistry,
        packages: BTreeMap<String, Package>,
        settings: Settings,
        client: Client,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            managers,
            packages,
            settings,
            client,
            reporter,
            cache: Arc::new(DiscoveryCache::new()),
            cancel: CancellationToken::new(),
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn InstallHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install one tool; errors become a `Failed` result at the
    /// `install_all` layer.
    pub async fn install(&self, name: &str, constraint: &str) -> Result<InstallResult, InstallError> {
        let started = Instant::now();
        let pkg = self
            .packages
            .get(name)
            .ok_or_else(|| InstallError::UnknownPackage(name.to_string()))?
            .clone();

        for hook in &self.hooks {
            if hook.handle(&pkg) == HookOutcome::Handled {
                return Ok(InstallResult {
                    name: name.to_string(),
                    version: constraint.to_string(),
                    status: InstallStatus::Installed,
                    version_status: None,
                    binary_path: None,
                    duration: started.elapsed(),
                    checksum: None,
                    download_size: 0,
                    message: Some("handled by plugin".to_string()),
                });
            }
        }

        let manager = self.managers.get_for_package(&pkg)?;
        let platform = self.settings.target_platform();
        let version =
            resolver::resolve_constraint(manager.as_ref(), &pkg, constraint, &platform, &self.cache)
                .await?;

        let bin_target = self
            .settings
            .bin_dir
            .join(pkg.binary_file_name(platform.is_windows()));

        // Skip-if-current: a matching installed version short-circuits the
        // whole pipeline.
        if !self.settings.force {
            let probe = verify::probe_installed(
                &bin_target,
                pkg.version_command.as_deref(),
                pkg.version_regex.as_deref(),
            )
            .await
            .unwrap_or_else(|_| verify::InstalledInfo {
                path: bin_target.clone(),
                exists: false,
                version: None,
                raw_output: String::new(),
            });
            if verify::compare(&version.normalized, &probe) == VersionStatus::Match {
                self.reporter
                    .done(name, &version.normalized, "already installed");
                return Ok(InstallResult {
                    name: name.to_string(),
                    version: version.normalized.clone(),
                    status: InstallStatus::AlreadyInstalled,
                    version_status: Some(VersionStatus::Match),
                    binary_path: Some(bin_target),
                    duration: started.elapsed(),
                    checksum: None,
                    download_size: 0,
                    message: None,
                });
            }
        }

        let resolution = manager.resolve(&pkg, &version, &platform).await?;
        tracing::info!(
            "{name} {}: {} (digest: {})",
            version.normalized,
            resolution.download_url,
            resolution.checksum.as_deref().unwrap_or("from checksum files")
        );

        std::fs::create_dir_all(&self.settings.bin_dir)?;
        self.reporter.installing(name, &version.normalized);

        if extract::is_system_installer(&resolution.download_url) {
            return self
                .run_system_installer(&pkg, &version, &resolution, started)
                .await;
        }

        let (work_dir, preserve_work) = self.make_work_dir()?;
        let result = self
            .install_from_resolution(
                &pkg,
                &version,
                &platform,
                &resolution,
                work_dir.path(),
                &bin_target,
                started,
            )
            .await;

        // Cleanup runs on every exit path; preservation only for
        // debugging or user-supplied temp dirs.
        if preserve_work {
            let kept = work_dir.keep();
            tracing::debug!("preserving work dir {}", kept.display());
        }

        match &result {
            Ok(r) => self.reporter.done(name, &r.version, "installed"),
            Err(e) => self.reporter.failed(name, &version.normalized, &e.to_string()),
        }
        result
    }

    /// Install every (name, constraint) pair concurrently. Failures are
    /// collected, not propagated.
    pub async fn install_all(&self, deps: &BTreeMap<String, String>) -> Vec<InstallResult> {
        let started = Instant::now();
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.settings.parallel.max(1)));
        let mut set = tokio::task::JoinSet::new();

        for (name, constraint) in deps {
            let installer = self.clone();
            let name = name.clone();
            let constraint = constraint.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let task_start = Instant::now();
                match installer.install(&name, &constraint).await {
                    Ok(result) => result,
                    Err(e) => InstallResult::failed(&name, &constraint, e.to_string(), task_start),
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => self.reporter.error(&format!("install task panicked: {e}")),
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));

        let failed = results
            .iter()
            .filter(|r| r.status == InstallStatus::Failed)
            .count();
        self.reporter
            .summary(results.len(), failed, started.elapsed().as_secs_f64());
        self.path_hygiene_checks(&results);
        results
    }

    #[allow(clippy::too_many_arguments)]
    async fn install_from_resolution(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
        resolution: &Resolution,
        work_dir: &Path,
        bin_target: &Path,
        started: Instant,
    ) -> Result<InstallResult, InstallError> {
        let mode = resolution.mode.unwrap_or(pkg.mode);
        let download_name = resolution
            .asset_name
            .clone()
            .or_else(|| {
                resolution
                    .download_url
                    .rsplit('/')
                    .next()
                    .map(str::to_string)
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| pkg.name.clone());
        let download_path = work_dir.join(&download_name);

        let expected = self
            .expected_checksum(pkg, version, platform, resolution, &download_name)
            .await?;

        let mut request = DownloadRequest::new(
            &self.client,
            resolution.download_url.as_str(),
            &download_path,
        )
        .labeled(&pkg.name, &version.normalized)
            .with_platform(platform.clone())
            .with_cache_dir(&self.settings.cache_dir)
            .with_reporter(self.reporter.clone())
            .with_cancel(self.cancel.clone());
        if let (Some(digest), true) = (&expected, self.settings.strict_checksum) {
            request = request.with_checksum(digest);
        }
        let downloaded = request.execute().await?;

        // Non-strict mode still reports mismatches, it just keeps going.
        if let (Some(digest), false) = (&expected, self.settings.strict_checksum) {
            let (algo, want) = checksum::split(digest)?;
            let have = match algo {
                checksum::Algo::Sha256 => downloaded.sha256.clone(),
                _ => checksum::digest_bytes(algo, &std::fs::read(&downloaded.path)?),
            };
            if !checksum::constant_time_eq(&have, &want) {
                self.reporter.warning(&format!(
                    "{}: checksum mismatch (expected {want}, got {have}); continuing without strict verification",
                    pkg.name
                ));
            }
        }

        let recorded_checksum = expected
            .clone()
            .unwrap_or_else(|| downloaded.canonical_checksum());

        let is_archive = pkg.extract.unwrap_or(resolution.is_archive);
        let binary_path = if is_archive {
            let extracted = work_dir.join("extracted");
            std::fs::create_dir_all(&extracted)?;
            extract::extract(&downloaded.path, &extracted, &self.cancel)?;

            match mode {
                InstallMode::Directory => {
                    self.finalize_directory_install(pkg, version, platform, &extracted)?
                }
                InstallMode::Binary => {
                    self.finalize_binary_install(
                        pkg,
                        version,
                        platform,
                        resolution,
                        &extracted,
                        bin_target,
                    )?
                }
            }
        } else {
            // Direct binary: the downloaded file is the tool.
            self.run_pipeline(pkg, version, platform, work_dir)?;
            let source = if download_path.is_file() {
                download_path.clone()
            } else {
                // The pipeline may have renamed it.
                let expected_name = pkg.binary_file_name(platform.is_windows());
                extract::find_binary_in_dir(
                    work_dir,
                    Some(expected_name.as_str()),
                    platform,
                    &version.normalized,
                )?
            };
            place_binary(&source, bin_target)?
        };

        if let Some(wrapper) = pkg.wrapper_script.as_deref() {
            self.write_wrapper_script(pkg, version, platform, wrapper)?;
        }

        let version_status = self.post_install_verify(pkg, &binary_path, version).await;

        Ok(InstallResult {
            name: pkg.name.clone(),
            version: version.normalized.clone(),
            status: if self.settings.force {
                InstallStatus::ForcedInstalled
            } else {
                InstallStatus::Installed
            },
            version_status,
            binary_path: Some(binary_path),
            duration: started.elapsed(),
            checksum: Some(recorded_checksum),
            download_size: downloaded.size,
            message: None,
        })
    }

    /// Work out the expected digest ahead of the download, honoring
    /// `skip_checksum`.
    async fn expected_checksum(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
        resolution: &Resolution,
        asset: &str,
    ) -> Result<Option<String>, InstallError> {
        if self.settings.skip_checksum {
            return Ok(None);
        }
        // The full checksum_file list wins over the manager's single
        // default sibling URL.
        let mut urls = crate::sources::checksum_urls(
            pkg,
            version,
            platform,
            Some(resolution.download_url.as_str()),
        )
        .unwrap_or_default();
        if urls.is_empty() {
            urls.extend(resolution.checksum_url.clone());
        }
        let source = ChecksumSource {
            known: resolution.checksum.clone(),
            urls,
            names: pkg.checksum_file_names(),
            expr: pkg.checksum_expr.clone(),
            asset: asset.to_string(),
            version: version.normalized.clone(),
        };
        match checksum::discover(&self.client, &source, platform).await {
            Ok(digest) => Ok(digest),
            Err(e) if !self.settings.strict_checksum => {
                self.reporter.warning(&format!(
                    "{}: checksum discovery failed ({e}); continuing without verification",
                    pkg.name
                ));
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Binary mode: pipeline in the extraction dir, then find and place
    /// the binary.
    fn finalize_binary_install(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
        resolution: &Resolution,
        extracted: &Path,
        bin_target: &Path,
    ) -> Result<PathBuf, InstallError> {
        self.run_pipeline(pkg, version, platform, extracted)?;

        let hint = pkg
            .binary_path
            .as_deref()
            .or(resolution.binary_path.as_deref());
        let found = extract::find_binary_in_dir(extracted, hint, platform, &version.normalized)?;
        place_binary(&found, bin_target).map_err(InstallError::from)
    }

    /// Directory mode: move the tree under the app dir, pipeline in the
    /// target, then symlink into the bin dir.
    fn finalize_directory_install(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
        extracted: &Path,
    ) -> Result<PathBuf, InstallError> {
        let target = self.settings.app_dir.join(&pkg.name);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::create_dir_all(self.settings.app_dir.as_path())?;
        if std::fs::rename(extracted, &target).is_err() {
            copy_dir_all(extracted, &target)
                .map_err(|e| InstallError::FinalizeIo(e.to_string()))?;
        }

        self.run_pipeline(pkg, version, platform, &target)?;

        let mut first_link = None;
        for pattern in &pkg.symlinks {
            let full = target.join(pattern);
            let matches = glob::glob(&full.to_string_lossy())
                .map_err(|e| InstallError::Other(e.to_string()))?;
            for source in matches.flatten() {
                let link = self
                    .settings
                    .bin_dir
                    .join(source.file_name().unwrap_or_default());
                replace_link(&source, &link)?;
                first_link.get_or_insert(link);
            }
        }

        Ok(first_link.unwrap_or(target))
    }

    fn run_pipeline(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
        root: &Path,
    ) -> Result<(), InstallError> {
        if pkg.post_process.is_empty() {
            return Ok(());
        }
        let sandbox = Sandbox::new(root)?;
        pipeline::run(
            &pkg.post_process,
            &sandbox,
            platform,
            &pkg.name,
            &version.normalized,
        )
        .map_err(InstallError::from)
    }

    fn write_wrapper_script(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
        wrapper: &str,
    ) -> Result<(), InstallError> {
        let ctx = serde_json::json!({
            "app_dir": self.settings.app_dir.to_string_lossy(),
            "bin_dir": self.settings.bin_dir.to_string_lossy(),
            "name": pkg.name,
            "version": version.normalized,
            "os": platform.os,
            "arch": platform.arch,
        });
        let body = template::render_with(wrapper, &ctx)?;
        let path = self.settings.bin_dir.join(&pkg.name);
        std::fs::write(&path, body)?;
        make_executable(&path)?;
        Ok(())
    }

    async fn post_install_verify(
        &self,
        pkg: &Package,
        binary_path: &Path,
        version: &Version,
    ) -> Option<VersionStatus> {
        if self.settings.skip_verify || pkg.version_command.is_none() {
            return None;
        }
        // Cross-platform installs can't run the foreign binary.
        if self.settings.target_platform() != Platform::current() {
            return None;
        }
        let probe = verify::probe_installed(
            binary_path,
            pkg.version_command.as_deref(),
            pkg.version_regex.as_deref(),
        )
        .await
        .ok()?;
        Some(verify::compare(&version.normalized, &probe))
    }

    async fn run_system_installer(
        &self,
        pkg: &Package,
        version: &Version,
        resolution: &Resolution,
        started: Instant,
    ) -> Result<InstallResult, InstallError> {
        self.reporter.warning(&format!(
            "{}: {} is a system installer; escalating to the native installer",
            pkg.name, resolution.download_url
        ));

        let (work_dir, preserve) = self.make_work_dir()?;
        let file_name = resolution
            .download_url
            .rsplit('/')
            .next()
            .unwrap_or("installer.pkg")
            .to_string();
        let dest = work_dir.path().join(&file_name);

        let mut request = DownloadRequest::new(&self.client, resolution.download_url.as_str(), &dest)
            .labeled(&pkg.name, &version.normalized)
            .with_cache_dir(&self.settings.cache_dir)
            .with_cancel(self.cancel.clone());
        if let Some(digest) = &resolution.checksum {
            request = request.with_checksum(digest);
        }
        let downloaded = request.execute().await?;

        let status = invoke_native_installer(&dest).await?;
        if !status {
            return Err(InstallError::Other(format!(
                "native installer failed for {}",
                pkg.name
            )));
        }

        // Marker file records the install since no binary lands in bin_dir.
        std::fs::create_dir_all(&self.settings.bin_dir)?;
        let marker = self.settings.bin_dir.join(format!(".{}.installed", pkg.name));
        let record = serde_json::json!({
            "name": pkg.name,
            "version": version.normalized,
            "url": resolution.download_url,
            "checksum": downloaded.canonical_checksum(),
        });
        std::fs::write(&marker, serde_json::to_string_pretty(&record).unwrap_or_default())?;

        if preserve {
            let kept = work_dir.keep();
            tracing::debug!("preserving work dir {}", kept.display());
        }

        Ok(InstallResult {
            name: pkg.name.clone(),
            version: version.normalized.clone(),
            status: InstallStatus::Installed,
            version_status: None,
            binary_path: Some(marker),
            duration: started.elapsed(),
            checksum: Some(downloaded.canonical_checksum()),
            download_size: downloaded.size,
            message: Some("system installer".to_string()),
        })
    }

    /// Temp dirs live under the configured tmp dir when one is set; those
    /// (and debug runs) are preserved after the install.
    fn make_work_dir(&self) -> Result<(tempfile::TempDir, bool), InstallError> {
        let (base, custom) = match &self.settings.tmp_dir {
            Some(dir) => (dir.clone(), true),
            None => (crate::default_tmp_dir(), false),
        };
        std::fs::create_dir_all(&base)?;
        let work = tempfile::Builder::new()
            .prefix("toolpin-")
            .tempdir_in(base)?;
        Ok((work, custom || self.settings.debug))
    }

    fn path_hygiene_checks(&self, results: &[InstallResult]) {
        let path_env = std::env::var_os("PATH").unwrap_or_default();
        let on_path = std::env::split_paths(&path_env).any(|p| p == self.settings.bin_dir);
        if !on_path {
            self.reporter.warning(&format!(
                "{} is not in your PATH",
                self.settings.bin_dir.display()
            ));
        }

        for result in results {
            if result.status == InstallStatus::Failed {
                continue;
            }
            if let Ok(found) = which::which(&result.name) {
                if !found.starts_with(&self.settings.bin_dir) {
                    self.reporter.warning(&format!(
                        "'{}' is shadowed by {}",
                        result.name,
                        found.display()
                    ));
                }
            }
        }
    }
}

/// Copy a binary into place (temp-then-rename within the target dir) and
/// mark it executable.
fn place_binary(source: &Path, target: &Path) -> Result<PathBuf, std::io::Error> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = target.with_extension("tmp-install");
    std::fs::copy(source, &staging)?;
    std::fs::rename(&staging, target)?;
    make_executable(target)?;
    Ok(target.to_path_buf())
}

fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

fn replace_link(source: &Path, link: &Path) -> std::io::Result<()> {
    if link.exists() || link.symlink_metadata().is_ok() {
        std::fs::remove_file(link)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(source, link)
    }
    #[cfg(not(unix))]
    {
        std::fs::copy(source, link).map(|_| ())
    }
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Run the native installer for `.pkg` / `.msi` artifacts.
async fn invoke_native_installer(path: &Path) -> Result<bool, InstallError> {
    #[cfg(target_os = "macos")]
    {
        let status = tokio::process::Command::new("installer")
            .arg("-pkg")
            .arg(path)
            .args(["-target", "/"])
            .status()
            .await?;
        Ok(status.success())
    }
    #[cfg(target_os = "windows")]
    {
        let status = tokio::process::Command::new("msiexec")
            .arg("/i")
            .arg(path)
            .arg("/qn")
            .status()
            .await?;
        Ok(status.success())
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let _ = path;
        Err(InstallError::Other(
            "system installers are not supported on this platform".to_string(),
        ))
    }
}
