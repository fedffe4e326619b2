//! Core data types shared across the crate.

pub mod package;
pub mod platform;
pub mod version;

pub use package::{InstallMode, Package};
pub use platform::Platform;
pub use version::Version;
