//! Streaming downloader with digest verification and a content-addressed
//! cache.
//!
//! Bytes stream to a temporary sibling of the destination while digests
//! are computed incrementally. The destination is only ever created by an
//! atomic rename of a fully verified temp file: on checksum mismatch the
//! temp file is deleted and `dest` does not exist. Transient network
//! failures retry with jittered backoff; checksum mismatches never retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use reqwest::Client;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::io::checksum::{self, Algo, ChecksumError, ChecksumSource};
use crate::types::Platform;
use crate::ui::Reporter;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
        file: String,
    },

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error("download cancelled")]
    Cancelled,
}

/// A verified download on disk.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub path: PathBuf,
    /// sha256 of the bytes, lowercase hex, always computed.
    pub sha256: String,
    pub size: u64,
    pub from_cache: bool,
}

impl Downloaded {
    /// The digest in canonical form for lock entries.
    pub fn canonical_checksum(&self) -> String {
        format!("sha256:{}", self.sha256)
    }
}

/// Builder for a single download.
pub struct DownloadRequest<'a> {
    client: &'a Client,
    url: String,
    dest: PathBuf,
    name: String,
    version: String,
    platform: Platform,
    checksum: Option<String>,
    checksum_source: Option<ChecksumSource>,
    cache_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    reporter: Option<Arc<dyn Reporter>>,
    cancel: CancellationToken,
}

impl<'a> DownloadRequest<'a> {
    pub fn new(client: &'a Client, url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            client,
            url: url.into(),
            dest: dest.into(),
            name: String::new(),
            version: String::new(),
            platform: Platform::current(),
            checksum: None,
            checksum_source: None,
            cache_dir: None,
            timeout: None,
            reporter: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Label progress events with a tool name and version.
    pub fn labeled(mut self, name: &str, version: &str) -> Self {
        self.name = name.to_string();
        self.version = version.to_string();
        self
    }

    /// Require a digest, `"algo:hex"` or bare hex.
    pub fn with_checksum(mut self, digest: &str) -> Self {
        self.checksum = Some(checksum::canonicalize(digest));
        self
    }

    /// Discover the digest from a single checksum file URL.
    pub fn with_checksum_url(self, url: impl Into<String>) -> Self {
        let asset = self
            .dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let version = self.version.clone();
        self.with_checksum_source(ChecksumSource {
            urls: vec![url.into()],
            asset,
            version,
            ..ChecksumSource::default()
        })
    }

    /// Discover the digest from checksum files before downloading.
    pub fn with_checksum_source(mut self, source: ChecksumSource) -> Self {
        self.checksum_source = Some(source);
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Reuse cached bytes when the (url, digest) was fetched before.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the download: resolve the expected digest, check the cache,
    /// stream + verify, rename into place, and populate the cache.
    pub async fn execute(self) -> Result<Downloaded, DownloadError> {
        let expected = match (&self.checksum, &self.checksum_source) {
            (Some(digest), _) => Some(digest.clone()),
            (None, Some(source)) => {
                checksum::discover(self.client, source, &self.platform).await?
            }
            (None, None) => None,
        };

        if let Some(parent) = self.dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if let Some(hit) = self.try_cache(expected.as_deref())? {
            return Ok(hit);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.stream_once(expected.as_deref()).await {
                Ok(done) => {
                    self.populate_cache(&done);
                    return Ok(done);
                }
                Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                    let backoff = backoff_with_jitter(attempt);
                    tracing::debug!(
                        "transient download failure for {} (attempt {attempt}): {e}; retrying in {backoff:?}",
                        self.url
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cache entries are content-addressed by expected digest; without a
    /// digest the key falls back to a hash of the URL.
    fn cache_key(&self, expected: Option<&str>) -> Option<String> {
        self.cache_dir.as_ref()?;
        let key = match expected {
            Some(digest) => digest.replace(':', "-"),
            None => format!("url-{}", hex::encode(Sha256::digest(self.url.as_bytes()))),
        };
        Some(key)
    }

    fn try_cache(&self, expected: Option<&str>) -> Result<Option<Downloaded>, DownloadError> {
        let (Some(dir), Some(key)) = (self.cache_dir.as_ref(), self.cache_key(expected)) else {
            return Ok(None);
        };
        let cached = dir.join(key);
        if !cached.is_file() {
            return Ok(None);
        }

        // Re-verify content-addressed entries before trusting them.
        if let Some(expected) = expected {
            let (algo, want) = checksum::split(expected)?;
            if algo == Algo::Sha256 {
                let have = checksum::sha256_file(&cached)?;
                if !checksum::constant_time_eq(&have, &want) {
                    std::fs::remove_file(&cached).ok();
                    return Ok(None);
                }
            }
        }

        if std::fs::hard_link(&cached, &self.dest).is_err() {
            std::fs::remove_file(&self.dest).ok();
            std::fs::copy(&cached, &self.dest)?;
        }
        let size = std::fs::metadata(&self.dest)?.len();
        let sha256 = checksum::sha256_file(&self.dest)?;
        tracing::debug!("cache hit for {}", self.url);
        Ok(Some(Downloaded {
            path: self.dest.clone(),
            sha256,
            size,
            from_cache: true,
        }))
    }

    fn populate_cache(&self, done: &Downloaded) {
        let Some(dir) = self.cache_dir.as_ref() else {
            return;
        };
        let key = match &self.checksum {
            Some(digest) => digest.replace(':', "-"),
            None => format!("sha256-{}", done.sha256),
        };
        if std::fs::create_dir_all(dir).is_ok() {
            let target = dir.join(key);
            if !target.exists() {
                let _ = std::fs::copy(&done.path, target);
            }
        }
    }

    async fn stream_once(&self, expected: Option<&str>) -> Result<Downloaded, DownloadError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        let total = response.content_length().unwrap_or(0);

        let file_name = self
            .dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());
        let suffix: u32 = rand::rng().random();
        let tmp_path = self
            .dest
            .with_file_name(format!(".{file_name}.part-{suffix:08x}"));

        let expected_algo = match expected {
            Some(digest) => Some(checksum::split(digest)?),
            None => None,
        };

        let result = self
            .stream_to(response, &tmp_path, total, expected_algo.as_ref())
            .await;
        let (sha256, size) = match result {
            Ok(pair) => pair,
            Err(e) => {
                // Partial downloads never survive.
                tokio::fs::remove_file(&tmp_path).await.ok();
                return Err(e);
            }
        };

        tokio::fs::rename(&tmp_path, &self.dest).await?;
        Ok(Downloaded {
            path: self.dest.clone(),
            sha256,
            size,
            from_cache: false,
        })
    }

    async fn stream_to(
        &self,
        response: reqwest::Response,
        tmp_path: &Path,
        total: u64,
        expected: Option<&(Algo, String)>,
    ) -> Result<(String, u64), DownloadError> {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        let mut stream = response.bytes_stream();
        let mut sha256 = Sha256::new();
        let mut verifier = expected.map(|(algo, want)| (StreamingDigest::new(*algo), want));
        let mut downloaded: u64 = 0;

        loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = stream.next() => match next {
                    Some(chunk) => chunk?,
                    None => break,
                },
            };
            file.write_all(&chunk).await?;
            sha256.update(&chunk);
            if let Some((digest, _)) = verifier.as_mut() {
                digest.update(&chunk);
            }
            downloaded += chunk.len() as u64;
            if let Some(reporter) = &self.reporter {
                reporter.downloading(&self.name, &self.version, downloaded, total);
            }
        }
        file.flush().await?;
        drop(file);

        let actual_sha256 = hex::encode(sha256.finalize());
        if let Some((digest, want)) = verifier {
            let actual = digest.finalize_hex();
            if !checksum::constant_time_eq(&actual, want) {
                if let Some(reporter) = &self.reporter {
                    reporter.failed(&self.name, &self.version, "checksum mismatch");
                }
                return Err(DownloadError::ChecksumMismatch {
                    expected: want.clone(),
                    actual,
                    file: self.dest.to_string_lossy().to_string(),
                });
            }
        }

        Ok((actual_sha256, downloaded))
    }
}

/// Incremental digest over whichever algorithm the expected checksum
/// names.
enum StreamingDigest {
    Sha1(Sha1),
    Sha256(Box<Sha256>),
    Sha512(Box<Sha512>),
}

impl StreamingDigest {
    fn new(algo: Algo) -> Self {
        match algo {
            Algo::Sha1 => Self::Sha1(Sha1::new()),
            Algo::Sha256 => Self::Sha256(Box::new(Sha256::new())),
            Algo::Sha512 => Self::Sha512(Box::new(Sha512::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

fn is_transient(err: &DownloadError) -> bool {
    match err {
        DownloadError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        DownloadError::HttpStatus { status, .. } => *status >= 500,
        _ => false,
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = 250u64.saturating_mul(1 << attempt.min(4));
    let jitter = rand::rng().random_range(0..250);
    Duration::from_millis(base + jitter)
}
