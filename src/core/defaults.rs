//! Built-in package registry.
//!
//! A small set of commonly requested tools, one per source manager, that
//! user registry entries may override by name.

use std::collections::BTreeMap;

use crate::types::{InstallMode, Package};

/// The built-in registry merged beneath user entries.
pub fn builtin_registry() -> BTreeMap<String, Package> {
    let mut registry = BTreeMap::new();
    for pkg in [
        jq(),
        kubectl(),
        helm(),
        terraform(),
        maven(),
        google_java_format(),
        golang(),
        gitlab_runner(),
    ] {
        registry.insert(pkg.name.clone(), pkg);
    }
    registry
}

fn jq() -> Package {
    let mut pkg = Package::new("jq", "github");
    pkg.repo = Some("jqlang/jq".to_string());
    pkg.asset_patterns = BTreeMap::from([
        ("linux-*".to_string(), "jq-linux-{{arch}}".to_string()),
        ("darwin-*".to_string(), "jq-macos-{{arch}}".to_string()),
        ("windows-*".to_string(), "jq-windows-{{arch}}.exe".to_string()),
    ]);
    pkg.version_command = Some("--version".to_string());
    pkg.version_regex = Some(r"jq-(\d+\.\d+(?:\.\d+)?)".to_string());
    pkg
}

fn kubectl() -> Package {
    let mut pkg = Package::new("kubectl", "url");
    pkg.url_template =
        Some("https://dl.k8s.io/release/v{{version}}/bin/{{os}}/{{arch}}/kubectl".to_string());
    pkg.versions_url = Some("https://dl.k8s.io/release/stable.txt".to_string());
    pkg.checksum_file = Some("kubectl.sha256".to_string());
    pkg.version_command = Some("version --client".to_string());
    pkg
}

fn helm() -> Package {
    let mut pkg = Package::new("helm", "url");
    pkg.url_template =
        Some("https://get.helm.sh/helm-v{{version}}-{{os}}-{{arch}}.tar.gz".to_string());
    pkg.versions_url = Some("https://api.github.com/repos/helm/helm/releases".to_string());
    pkg.versions_expr = Some("json | map(attribute='tag_name')".to_string());
    pkg.checksum_file =
        Some("https://get.helm.sh/helm-v{{version}}-{{os}}-{{arch}}.tar.gz.sha256sum".to_string());
    pkg.binary_path = Some("{{os}}-{{arch}}/helm".to_string());
    pkg.version_command = Some("version --short".to_string());
    pkg
}

fn terraform() -> Package {
    let mut pkg = Package::new("terraform", "url");
    pkg.url_template = Some(
        "https://releases.hashicorp.com/terraform/{{version}}/terraform_{{version}}_{{os}}_{{arch}}.zip"
            .to_string(),
    );
    pkg.checksum_file = Some(
        "https://releases.hashicorp.com/terraform/{{version}}/terraform_{{version}}_SHA256SUMS"
            .to_string(),
    );
    pkg.version_command = Some("version".to_string());
    pkg.version_regex = Some(r"Terraform v(\d+\.\d+\.\d+)".to_string());
    pkg
}

fn maven() -> Package {
    let mut pkg = Package::new("maven", "apache");
    pkg.repo = Some("maven/maven-3".to_string());
    pkg.url_template = Some(
        "https://archive.apache.org/dist/maven/maven-3/{{version}}/binaries/apache-maven-{{version}}-bin.tar.gz"
            .to_string(),
    );
    pkg.mode = InstallMode::Directory;
    pkg.symlinks = vec!["bin/mvn".to_string()];
    pkg.version_command = Some("--version".to_string());
    pkg
}

fn google_java_format() -> Package {
    let mut pkg = Package::new("google-java-format", "maven");
    pkg.repo = Some("com.google.googlejavaformat:google-java-format".to_string());
    pkg.url_template = Some(
        "https://repo1.maven.org/maven2/com/google/googlejavaformat/google-java-format/{{version}}/google-java-format-{{version}}-all-deps.jar"
            .to_string(),
    );
    pkg.extract = Some(false);
    pkg
}

fn golang() -> Package {
    let mut pkg = Package::new("go", "go");
    pkg.mode = InstallMode::Directory;
    pkg.symlinks = vec!["bin/go".to_string(), "bin/gofmt".to_string()];
    pkg.version_command = Some("version".to_string());
    pkg.version_regex = Some(r"go version go(\d+\.\d+(?:\.\d+)?)".to_string());
    pkg
}

fn gitlab_runner() -> Package {
    let mut pkg = Package::new("gitlab-runner", "gitlab");
    pkg.repo = Some("gitlab-org/gitlab-runner".to_string());
    pkg.url_template = Some(
        "https://gitlab-runner-downloads.s3.amazonaws.com/v{{version}}/binaries/gitlab-runner-{{os}}-{{arch}}"
            .to_string(),
    );
    pkg.version_command = Some("--version".to_string());
    pkg
}
