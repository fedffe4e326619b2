//! Pipeline sandbox: a filesystem root outside which operations must not
//! act.
//!
//! Every path an op touches resolves through [`Sandbox::resolve`], which
//! rejects absolute paths and anything that lexically escapes the root.
//! Containment is checked before any mutation.

use std::path::{Component, Path, PathBuf};

use super::PipelineError;

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Root must exist; it is canonicalized so symlinked temp dirs (e.g.
    /// /tmp on macOS) compare correctly.
    pub fn new(root: &Path) -> Result<Self, PipelineError> {
        let root = root.canonicalize().map_err(PipelineError::Io)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path against the root, rejecting escapes.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, PipelineError> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Err(PipelineError::SandboxEscape(relative.to_string()));
        }
        let mut out = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !out.pop() || !out.starts_with(&self.root) {
                        return Err(PipelineError::SandboxEscape(relative.to_string()));
                    }
                }
                _ => return Err(PipelineError::SandboxEscape(relative.to_string())),
            }
        }
        if out.starts_with(&self.root) {
            Ok(out)
        } else {
            Err(PipelineError::SandboxEscape(relative.to_string()))
        }
    }

    /// A path relative to the root, for op return values.
    pub fn relativize(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .unwrap_or(absolute)
            .to_string_lossy()
            .to_string()
    }
}
