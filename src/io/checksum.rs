//! Checksum discovery and digest handling.
//!
//! Digests are stored canonically as `"<algo>:<lowercase-hex>"`; bare hex
//! input is accepted and the algorithm inferred from its length (sha256
//! when ambiguous). Checksum files may be standard `<hex>  <filename>`
//! tables, single bare-hex bodies, or anything a `checksum_expr` can
//! extract.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::core::expr::{self, ExprError};
use crate::types::Platform;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} fetching checksum file {url}")]
    Status { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no checksum entry for '{asset}' in fetched checksum files")]
    NoEntry { asset: String },

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error("'{0}' is not a valid digest")]
    InvalidDigest(String),
}

/// Digest algorithms understood by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algo {
    Sha1,
    Sha256,
    Sha512,
}

impl Algo {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            128 => Some(Self::Sha512),
            _ => None,
        }
    }

    fn digest_hex(self, data: &[u8]) -> String {
        match self {
            Self::Sha1 => hex::encode(Sha1::digest(data)),
            Self::Sha256 => hex::encode(Sha256::digest(data)),
            Self::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

/// Normalize a digest to `"algo:hex"` with lowercase hex. Accepts both
/// `"sha256:ABC..."` and bare hex; unknown algorithms and lengths fall
/// back to sha256 labeling rather than guessing wildly.
pub fn canonicalize(digest: &str) -> String {
    let trimmed = digest.trim();
    if let Some((algo, hex)) = trimmed.split_once(':') {
        if let Some(known) = Algo::from_name(algo) {
            return format!("{}:{}", known.as_str(), hex.trim().to_lowercase());
        }
    }
    let hex = trimmed.to_lowercase();
    let algo = Algo::from_hex_len(hex.len()).unwrap_or(Algo::Sha256);
    format!("{}:{hex}", algo.as_str())
}

/// Split a canonical or bare digest into (algo, hex).
pub fn split(digest: &str) -> Result<(Algo, String), ChecksumError> {
    let canonical = canonicalize(digest);
    let (algo, hex) = canonical
        .split_once(':')
        .ok_or_else(|| ChecksumError::InvalidDigest(digest.to_string()))?;
    let algo = Algo::from_name(algo).ok_or_else(|| ChecksumError::InvalidDigest(digest.to_string()))?;
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChecksumError::InvalidDigest(digest.to_string()));
    }
    Ok((algo, hex.to_string()))
}

/// Constant-time equality over digest strings.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The first hex-looking token in a body, for single-digest files.
pub fn first_hex_token(body: &str) -> Option<String> {
    body.split_whitespace()
        .map(|t| t.trim_start_matches('\\'))
        .find(|t| t.len() >= 40 && t.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|t| t.to_lowercase())
}

/// Parse a standard checksum table: one `<hex> <spaces> <filename>` pair
/// per line (the `*filename` binary marker is tolerated), plus the BSD
/// `ALGO (filename) = hex` form.
pub fn parse_checksum_table(body: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // BSD form.
        if let Some((head, hex)) = line.split_once(" = ") {
            if let (Some(open), Some(close)) = (head.find('('), head.rfind(')')) {
                if open < close {
                    let file = head[open + 1..close].trim().to_string();
                    let hex = hex.trim().to_lowercase();
                    if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                        out.push((file, hex));
                        continue;
                    }
                }
            }
        }

        let mut parts = line.split_whitespace();
        let (Some(hex), Some(file)) = (parts.next(), parts.next()) else {
            continue;
        };
        if hex.len() < 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        let file = file.trim_start_matches('*').to_string();
        out.push((file, hex.to_lowercase()));
    }
    out
}

/// Find the digest for an asset in a checksum body: exact filename match,
/// then path-suffix match, then a bare single-digest body.
pub fn lookup_in_body(body: &str, asset: &str) -> Option<String> {
    let table = parse_checksum_table(body);
    if let Some((_, hex)) = table.iter().find(|(file, _)| file == asset) {
        return Some(hex.clone());
    }
    if let Some((_, hex)) = table
        .iter()
        .find(|(file, _)| file.rsplit('/').next() == Some(asset))
    {
        return Some(hex.clone());
    }
    if table.is_empty() {
        return first_hex_token(body);
    }
    None
}

/// Inputs to checksum discovery for one resolved download.
#[derive(Debug, Clone, Default)]
pub struct ChecksumSource {
    /// Digest already known from the source manager.
    pub known: Option<String>,
    /// Fetched in parallel; aligned with `names`.
    pub urls: Vec<String>,
    /// Logical names keying the bodies for `expr`.
    pub names: Vec<String>,
    pub expr: Option<String>,
    /// Asset filename looked up in checksum tables.
    pub asset: String,
    pub version: String,
}

/// Resolve the expected digest for a download, in `"algo:hex"` form.
///
/// Precedence: a digest supplied by the source, then checksum files
/// (expression-extracted or table lookup). `Ok(None)` means no checksum
/// source is configured at all; the caller decides whether to stream-hash
/// instead.
pub async fn discover(
    client: &reqwest::Client,
    source: &ChecksumSource,
    platform: &Platform,
) -> Result<Option<String>, ChecksumError> {
    if let Some(known) = source.known.as_deref().filter(|s| !s.trim().is_empty()) {
        return Ok(Some(canonicalize(known)));
    }
    if source.urls.is_empty() {
        return Ok(None);
    }

    let bodies = futures::future::try_join_all(
        source.urls.iter().map(|url| fetch_with_retry(client, url)),
    )
    .await?;

    let mut files = BTreeMap::new();
    for (idx, body) in bodies.into_iter().enumerate() {
        let name = source
            .names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| logical_name(&source.urls[idx], idx));
        files.insert(name, body);
    }

    if let Some(expr_src) = source.expr.as_deref() {
        let digest = expr::eval_checksum_expr(
            expr_src,
            &files,
            &source.asset,
            &source.version,
            &platform.os,
            &platform.arch,
        )?;
        if digest.is_empty() {
            return Err(ChecksumError::NoEntry {
                asset: source.asset.clone(),
            });
        }
        return Ok(Some(canonicalize(&digest)));
    }

    for body in files.values() {
        if let Some(hex) = lookup_in_body(body, &source.asset) {
            return Ok(Some(canonicalize(&hex)));
        }
    }
    Err(ChecksumError::NoEntry {
        asset: source.asset.clone(),
    })
}

fn logical_name(url: &str, idx: usize) -> String {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.replace(['.', '-'], "_"))
        .unwrap_or_else(|| format!("file{idx}"))
}

async fn fetch_with_retry(client: &reqwest::Client, url: &str) -> Result<String, ChecksumError> {
    let mut last_err = None;
    for attempt in 0..2 {
        if attempt > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
        let response = match client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                last_err = Some(ChecksumError::Http(e));
                continue;
            }
        };
        let status = response.status();
        if status.is_success() {
            return Ok(response.text().await?);
        }
        let err = ChecksumError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        };
        if status.is_server_error() {
            last_err = Some(err);
            continue;
        }
        return Err(err);
    }
    Err(last_err.expect("retry loop records an error"))
}

/// Stream a URL and compute sha256 over the bytes without keeping them.
/// The lock generator's last-resort digest acquisition.
pub async fn stream_sha256(
    client: &reqwest::Client,
    url: &str,
) -> Result<(String, u64), ChecksumError> {
    use futures::StreamExt;

    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ChecksumError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let mut hasher = Sha256::new();
    let mut size: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        size += chunk.len() as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// sha256 of a file on disk, as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String, ChecksumError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest a byte slice with the given algorithm, as lowercase hex.
pub fn digest_bytes(algo: Algo, data: &[u8]) -> String {
    algo.digest_hex(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize() {
        assert_eq!(
            canonicalize(&format!("sha256:{}", "AB".repeat(32))),
            format!("sha256:{}", "ab".repeat(32))
        );
        assert_eq!(
            canonicalize(&"cd".repeat(32)),
            format!("sha256:{}", "cd".repeat(32))
        );
        assert_eq!(
            canonicalize(&"ef".repeat(20)),
            format!("sha1:{}", "ef".repeat(20))
        );
        assert_eq!(
            canonicalize(&"12".repeat(64)),
            format!("sha512:{}", "12".repeat(64))
        );
    }

    #[test]
    fn test_split_rejects_garbage() {
        assert!(split("sha256:zzzz").is_err());
        assert!(split(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn test_parse_checksum_table() {
        let body = format!(
            "# comment\n{h1}  jq-linux-amd64\n{h2} *jq-macos-arm64\n",
            h1 = "aa".repeat(32),
            h2 = "bb".repeat(32),
        );
        let table = parse_checksum_table(&body);
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].0, "jq-linux-amd64");
        assert_eq!(table[1].0, "jq-macos-arm64");
    }

    #[test]
    fn test_parse_bsd_form() {
        let body = format!("SHA256 (helm.tar.gz) = {}", "cc".repeat(32));
        let table = parse_checksum_table(&body);
        assert_eq!(table, vec![("helm.tar.gz".to_string(), "cc".repeat(32))]);
    }

    #[test]
    fn test_lookup_bare_digest_body() {
        let body = format!("{}\n", "dd".repeat(32));
        assert_eq!(lookup_in_body(&body, "anything"), Some("dd".repeat(32)));
    }

    #[test]
    fn test_lookup_path_suffix() {
        let body = format!("{}  ./dist/tool-linux-amd64\n", "ee".repeat(32));
        assert_eq!(
            lookup_in_body(&body, "tool-linux-amd64"),
            Some("ee".repeat(32))
        );
    }

    #[tokio::test]
    async fn test_discover_prefers_known() {
        let client = reqwest::Client::new();
        let source = ChecksumSource {
            known: Some("AB".repeat(32)),
            ..Default::default()
        };
        let got = discover(&client, &source, &Platform::new("linux", "amd64"))
            .await
            .unwrap();
        assert_eq!(got, Some(format!("sha256:{}", "ab".repeat(32))));
    }

    #[tokio::test]
    async fn test_discover_none_without_sources() {
        let client = reqwest::Client::new();
        let got = discover(
            &client,
            &ChecksumSource::default(),
            &Platform::new("linux", "amd64"),
        )
        .await
        .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_discover_from_table() {
        let mut server = mockito::Server::new_async().await;
        let hex = "ab".repeat(32);
        server
            .mock("GET", "/sums.txt")
            .with_status(200)
            .with_body(format!("{hex}  jq-linux-amd64\n"))
            .create_async()
            .await;

        let source = ChecksumSource {
            urls: vec![format!("{}/sums.txt", server.url())],
            names: vec!["sums".to_string()],
            asset: "jq-linux-amd64".to_string(),
            version: "1.7.1".to_string(),
            ..Default::default()
        };
        let got = discover(
            &reqwest::Client::new(),
            &source,
            &Platform::new("linux", "amd64"),
        )
        .await
        .unwrap();
        assert_eq!(got, Some(format!("sha256:{hex}")));
    }

    #[tokio::test]
    async fn test_discover_with_expr() {
        let mut server = mockito::Server::new_async().await;
        let hex = "cd".repeat(32);
        server
            .mock("GET", "/sums.txt")
            .with_status(200)
            .with_body(hex.clone())
            .create_async()
            .await;

        let source = ChecksumSource {
            urls: vec![format!("{}/sums.txt", server.url())],
            names: vec!["sums".to_string()],
            expr: Some("sums".to_string()),
            asset: "tool".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        let got = discover(
            &reqwest::Client::new(),
            &source,
            &Platform::new("linux", "amd64"),
        )
        .await
        .unwrap();
        assert_eq!(got, Some(format!("sha256:{hex}")));
    }
}
