//! Resolution engine: constraints, templates, expressions, manifest and
//! lock file models.

pub mod constraint;
pub mod defaults;
pub mod expr;
pub mod lockfile;
pub mod manifest;
pub mod resolver;
pub mod template;

pub use constraint::Constraint;
pub use lockfile::{LockEntry, LockFile, PlatformEntry};
pub use manifest::{Manifest, Settings};
