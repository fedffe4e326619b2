//! End-to-end lock generation: manifest -> resolve -> lock file on disk.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::Digest;
use tempfile::TempDir;

use toolpin::core::lockfile::LockFile;
use toolpin::core::manifest::Manifest;
use toolpin::ops::lock::{self, LockOptions};
use toolpin::sources::direct::DirectManager;
use toolpin::sources::ManagerRegistry;
use toolpin::types::{Package, Platform};
use toolpin::ui::NullReporter;

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha2::Sha256::digest(data))
}

async fn serve_asset(server: &mut mockito::Server, name: &str, version: &str, platform: &str) -> String {
    let body = format!("{name}-{version}-{platform} bytes").into_bytes();
    let digest = sha256_hex(&body);
    server
        .mock("GET", format!("/dl/{name}-{version}-{platform}").as_str())
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    server
        .mock(
            "GET",
            format!("/dl/{name}-{version}-{platform}.sha256").as_str(),
        )
        .with_status(200)
        .with_body(format!("{digest}  {name}-{version}-{platform}\n"))
        .create_async()
        .await;
    digest
}

fn package_for(server: &mockito::Server, name: &str) -> Package {
    let mut pkg = Package::new(name, "url");
    pkg.url_template = Some(format!(
        "{}/dl/{name}-{{{{version}}}}-{{{{os}}}}-{{{{arch}}}}",
        server.url()
    ));
    pkg.checksum_file = Some(format!("{name}-{{{{version}}}}-{{{{os}}}}-{{{{arch}}}}.sha256"));
    pkg
}

fn registry(client: &reqwest::Client) -> ManagerRegistry {
    ManagerRegistry::builder()
        .with(DirectManager::new(client.clone()))
        .build()
}

#[tokio::test]
async fn lock_two_platforms_and_save() {
    let mut server = mockito::Server::new_async().await;
    let linux_digest = serve_asset(&mut server, "helm", "3.14.0", "linux-amd64").await;
    let mac_digest = serve_asset(&mut server, "helm", "3.14.0", "darwin-arm64").await;

    let client = reqwest::Client::new();
    let deps = BTreeMap::from([("helm".to_string(), "3.14.0".to_string())]);
    let packages = BTreeMap::from([("helm".to_string(), package_for(&server, "helm"))]);
    let opts = LockOptions {
        platforms: Platform::parse_list(&["linux-amd64", "darwin-arm64"]).unwrap(),
        ..Default::default()
    };

    let report = lock::generate(
        &deps,
        &packages,
        &registry(&client),
        &client,
        Arc::new(NullReporter),
        &opts,
    )
    .await
    .unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    let entry = &report.lock.dependencies["helm"];
    assert_eq!(entry.version, "3.14.0");
    let linux = &entry.platforms["linux-amd64"];
    let mac = &entry.platforms["darwin-arm64"];
    assert_eq!(linux.checksum, format!("sha256:{linux_digest}"));
    assert_eq!(mac.checksum, format!("sha256:{mac_digest}"));
    for checksum in [&linux.checksum, &mac.checksum] {
        let hex = checksum.strip_prefix("sha256:").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    // Round-trip through disk.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("deps-lock.yaml");
    report.lock.save(&path).unwrap();
    let loaded = LockFile::load(&path).unwrap();
    assert_eq!(loaded.version, "1.0");
    assert_eq!(loaded.dependencies["helm"].platforms.len(), 2);
    assert_eq!(loaded.dependencies["helm"].platforms["linux-amd64"].url, linux.url);
}

#[tokio::test]
async fn update_fills_missing_platform_only() {
    let mut server = mockito::Server::new_async().await;
    serve_asset(&mut server, "tool", "1.0.0", "linux-amd64").await;
    serve_asset(&mut server, "tool", "1.0.0", "darwin-arm64").await;

    let client = reqwest::Client::new();
    let deps = BTreeMap::from([("tool".to_string(), "1.0.0".to_string())]);
    let packages = BTreeMap::from([("tool".to_string(), package_for(&server, "tool"))]);

    let first = lock::generate(
        &deps,
        &packages,
        &registry(&client),
        &client,
        Arc::new(NullReporter),
        &LockOptions {
            platforms: Platform::parse_list(&["linux-amd64"]).unwrap(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let second = lock::update(
        first.lock,
        &deps,
        &packages,
        &registry(&client),
        &client,
        Arc::new(NullReporter),
        &LockOptions {
            platforms: Platform::parse_list(&["linux-amd64", "darwin-arm64"]).unwrap(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(second.failures.is_empty(), "{:?}", second.failures);
    let entry = &second.lock.dependencies["tool"];
    assert_eq!(entry.platforms.len(), 2);
}

#[tokio::test]
async fn manifest_registry_overrides_feed_lock() {
    let mut server = mockito::Server::new_async().await;
    serve_asset(&mut server, "jq", "1.7.1", "linux-amd64").await;

    let manifest = Manifest::parse(&format!(
        r"
dependencies:
  jq: 1.7.1
registry:
  jq:
    manager: url
    url_template: '{base}/dl/jq-{{{{version}}}}-{{{{os}}}}-{{{{arch}}}}'
    checksum_file: 'jq-{{{{version}}}}-{{{{os}}}}-{{{{arch}}}}.sha256'
",
        base = server.url()
    ))
    .unwrap();

    let client = reqwest::Client::new();
    let packages = manifest.effective_registry();
    let report = lock::generate(
        &manifest.dependencies,
        &packages,
        &registry(&client),
        &client,
        Arc::new(NullReporter),
        &LockOptions {
            platforms: Platform::parse_list(&["linux-amd64"]).unwrap(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let entry = &report.lock.dependencies["jq"];
    assert!(entry.platforms["linux-amd64"].url.starts_with(&server.url()));
}
