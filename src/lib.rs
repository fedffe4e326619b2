//! toolpin - reproducible binary dependency management
//!
//! Given a declarative manifest of tools and version constraints, toolpin
//! discovers available versions from heterogeneous sources (GitHub, GitLab,
//! Apache archives, Maven Central, direct URLs, the Go download index),
//! resolves constraints to exact versions and platform-specific URLs and
//! digests, writes a multi-platform lock file, and installs verified
//! binaries into a target directory.
//!
//! The crate is a library; a CLI front end drives it through
//! [`ops::install`] and [`ops::lock`].

pub mod core;
pub mod io;
pub mod ops;
pub mod pipeline;
pub mod sources;
pub mod types;
pub mod ui;

// Re-exports for convenience
pub use crate::core::constraint;
pub use crate::core::lockfile;
pub use crate::core::manifest;
pub use crate::io::download as downloader;
pub use crate::io::extract as extractor;
pub use crate::types::platform::Platform;
pub use crate::types::version::Version;

use std::path::PathBuf;

use dirs::home_dir;

/// User agent sent on every HTTP request.
pub const USER_AGENT: &str = concat!("toolpin/", env!("CARGO_PKG_VERSION"));

/// Try to get the toolpin home directory, returning None if the home
/// directory cannot be determined.
pub fn try_toolpin_home() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".toolpin"))
}

/// Default toolpin home directory: ~/.toolpin
///
/// # Panics
/// Panics if the home directory cannot be determined.
pub fn toolpin_home() -> PathBuf {
    try_toolpin_home().expect("Could not determine home directory")
}

/// Default binary installation target: ~/.toolpin/bin
pub fn default_bin_dir() -> PathBuf {
    toolpin_home().join("bin")
}

/// Default directory-mode install root: ~/.toolpin/app
pub fn default_app_dir() -> PathBuf {
    toolpin_home().join("app")
}

/// Default download cache: ~/.toolpin/cache
pub fn default_cache_dir() -> PathBuf {
    toolpin_home().join("cache")
}

/// Default temp area, guaranteed same volume as the bin dir.
pub fn default_tmp_dir() -> PathBuf {
    toolpin_home().join("tmp")
}
