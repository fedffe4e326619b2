//! Builtin pipeline operations.
//!
//! Every op takes and returns paths relative to the sandbox root; inputs
//! resolve through the sandbox and escaping paths are rejected before any
//! filesystem mutation.

use std::path::Path;

use super::sandbox::Sandbox;
use super::PipelineError;

/// File kinds a glob can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobKind {
    Dir,
    Executable,
    Archive,
}

impl GlobKind {
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        match s {
            "dir" => Ok(Self::Dir),
            "executable" => Ok(Self::Executable),
            "archive" => Ok(Self::Archive),
            other => Err(PipelineError::Eval {
                expr: String::new(),
                message: format!("unknown glob type '{other}'"),
            }),
        }
    }

    fn matches(self, path: &Path) -> bool {
        match self {
            Self::Dir => path.is_dir(),
            Self::Executable => crate::io::extract::is_executable(path),
            Self::Archive => crate::io::extract::looks_like_archive(&path.to_string_lossy()),
        }
    }
}

/// `glob(pattern, [type])`: relative paths matching a pattern inside the
/// sandbox. A `":type"` suffix on the pattern is equivalent to the second
/// argument.
pub fn glob_paths(
    sandbox: &Sandbox,
    pattern: &str,
    kind: Option<&str>,
) -> Result<Vec<String>, PipelineError> {
    let (pattern, kind) = match (pattern.rsplit_once(':'), kind) {
        (Some((head, suffix)), None) if GlobKind::parse(suffix).is_ok() => {
            (head, Some(GlobKind::parse(suffix)?))
        }
        (_, Some(k)) => (pattern, Some(GlobKind::parse(k)?)),
        _ => (pattern, None),
    };

    // Validate the pattern itself cannot address outside the root.
    if Path::new(pattern).is_absolute() || pattern.split('/').any(|c| c == "..") {
        return Err(PipelineError::SandboxEscape(pattern.to_string()));
    }

    let full = sandbox.root().join(pattern);
    let walker = glob::glob(&full.to_string_lossy()).map_err(|e| PipelineError::Eval {
        expr: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut out = Vec::new();
    for path in walker.flatten() {
        if let Some(k) = kind {
            if !k.matches(&path) {
                continue;
            }
        }
        out.push(sandbox.relativize(&path));
    }
    out.sort();
    Ok(out)
}

/// `move(src, dst)`: rename inside the sandbox, creating parents.
pub fn do_move(sandbox: &Sandbox, src: &str, dst: &str) -> Result<String, PipelineError> {
    let from = sandbox.resolve(src)?;
    let to = sandbox.resolve(dst)?;
    if !from.exists() {
        return Err(PipelineError::NoMatch {
            pattern: src.to_string(),
        });
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(PipelineError::Io)?;
    }
    std::fs::rename(&from, &to).map_err(PipelineError::Io)?;
    Ok(sandbox.relativize(&to))
}

/// `chdir(pattern)`: promote the unique matching directory's contents to
/// the sandbox root.
pub fn do_chdir(sandbox: &Sandbox, pattern: &str) -> Result<String, PipelineError> {
    let matches = glob_paths(sandbox, pattern, Some("dir"))?;
    let dir = match matches.as_slice() {
        [one] => one.clone(),
        [] => {
            return Err(PipelineError::NoMatch {
                pattern: pattern.to_string(),
            })
        }
        many => {
            return Err(PipelineError::Eval {
                expr: pattern.to_string(),
                message: format!("chdir pattern matched {} directories", many.len()),
            })
        }
    };

    let source = sandbox.resolve(&dir)?;
    for entry in std::fs::read_dir(&source).map_err(PipelineError::Io)? {
        let entry = entry.map_err(PipelineError::Io)?;
        let target = sandbox.root().join(entry.file_name());
        std::fs::rename(entry.path(), target).map_err(PipelineError::Io)?;
    }
    std::fs::remove_dir(&source).map_err(PipelineError::Io)?;
    Ok(dir)
}

/// `chmod(pattern, mode)`: apply an octal mode to every match.
pub fn do_chmod(
    sandbox: &Sandbox,
    pattern: &str,
    mode: &str,
) -> Result<Vec<String>, PipelineError> {
    let parsed =
        u32::from_str_radix(mode.trim_start_matches("0o"), 8).map_err(|_| {
            PipelineError::InvalidMode(mode.to_string())
        })?;

    let matches = glob_paths(sandbox, pattern, None)?;
    if matches.is_empty() {
        return Err(PipelineError::NoMatch {
            pattern: pattern.to_string(),
        });
    }

    for rel in &matches {
        let path = sandbox.resolve(rel)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(parsed))
                .map_err(PipelineError::Io)?;
        }
        #[cfg(not(unix))]
        {
            let _ = (&path, parsed);
        }
    }
    Ok(matches)
}

/// `delete(pattern)` / `delete(list)`: remove files or trees.
pub fn do_delete(sandbox: &Sandbox, targets: &[String]) -> Result<Vec<String>, PipelineError> {
    let mut removed = Vec::new();
    for rel in targets {
        let path = sandbox.resolve(rel)?;
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(PipelineError::Io)?;
        } else if path.exists() {
            std::fs::remove_file(&path).map_err(PipelineError::Io)?;
        } else {
            continue;
        }
        removed.push(rel.clone());
    }
    Ok(removed)
}

/// `unarchive(path)`: extract an archive in place, then remove it.
pub fn do_unarchive(sandbox: &Sandbox, archive: &str) -> Result<usize, PipelineError> {
    let path = sandbox.resolve(archive)?;
    if !path.is_file() {
        return Err(PipelineError::NoMatch {
            pattern: archive.to_string(),
        });
    }
    let count = crate::io::extract::extract(
        &path,
        sandbox.root(),
        &tokio_util::sync::CancellationToken::new(),
    )
    .map_err(PipelineError::Extract)?;
    std::fs::remove_file(&path).map_err(PipelineError::Io)?;
    Ok(count)
}

/// Doc and scratch artifacts removed by `cleanup()`.
const CLEANUP_DOCS: &[&str] = &[
    "LICENSE",
    "README",
    "README.md",
    "CHANGELOG",
    "CHANGELOG.md",
    "NOTICE",
];

/// `cleanup()`: remove dotfiles, editor droppings, and well-known doc
/// artifacts from the sandbox root.
pub fn do_cleanup(sandbox: &Sandbox) -> Result<Vec<String>, PipelineError> {
    let mut removed = Vec::new();
    for entry in std::fs::read_dir(sandbox.root()).map_err(PipelineError::Io)? {
        let entry = entry.map_err(PipelineError::Io)?;
        let name = entry.file_name().to_string_lossy().to_string();
        let junk = name.starts_with('.')
            || name.starts_with('~')
            || name.ends_with(".tmp")
            || name.ends_with(".temp")
            || CLEANUP_DOCS.contains(&name.as_str());
        if !junk {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(PipelineError::Io)?;
        } else {
            std::fs::remove_file(&path).map_err(PipelineError::Io)?;
        }
        removed.push(name);
    }
    removed.sort();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sandbox_with(files: &[&str]) -> (tempfile::TempDir, Sandbox) {
        let dir = tempdir().unwrap();
        for f in files {
            let path = dir.path().join(f);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"x").unwrap();
        }
        let sandbox = Sandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn test_glob_and_types() {
        let (_dir, sandbox) = sandbox_with(&["bin/tool", "bin/other", "doc/README"]);
        let all = glob_paths(&sandbox, "bin/*", None).unwrap();
        assert_eq!(all, vec!["bin/other", "bin/tool"]);

        std::fs::create_dir_all(sandbox.root().join("nested")).unwrap();
        let dirs = glob_paths(&sandbox, "*", Some("dir")).unwrap();
        assert!(dirs.contains(&"bin".to_string()));
        assert!(dirs.contains(&"nested".to_string()));
        assert!(!dirs.contains(&"doc/README".to_string()));
    }

    #[test]
    fn test_glob_type_suffix() {
        let (_dir, sandbox) = sandbox_with(&["a/file"]);
        let dirs = glob_paths(&sandbox, "*:dir", None).unwrap();
        assert_eq!(dirs, vec!["a"]);
    }

    #[test]
    fn test_glob_rejects_escape() {
        let (_dir, sandbox) = sandbox_with(&[]);
        assert!(matches!(
            glob_paths(&sandbox, "../*", None),
            Err(PipelineError::SandboxEscape(_))
        ));
    }

    #[test]
    fn test_move_and_missing_source() {
        let (_dir, sandbox) = sandbox_with(&["bin/tool"]);
        let moved = do_move(&sandbox, "bin/tool", "tool").unwrap();
        assert_eq!(moved, "tool");
        assert!(sandbox.root().join("tool").is_file());

        assert!(matches!(
            do_move(&sandbox, "bin/tool", "x"),
            Err(PipelineError::NoMatch { .. })
        ));
        assert!(matches!(
            do_move(&sandbox, "../evil", "x"),
            Err(PipelineError::SandboxEscape(_))
        ));
    }

    #[test]
    fn test_chdir_promotes_unique_dir() {
        let (_dir, sandbox) = sandbox_with(&["tool-1.0/bin/tool", "tool-1.0/README"]);
        do_chdir(&sandbox, "tool-*").unwrap();
        assert!(sandbox.root().join("bin/tool").is_file());
        assert!(sandbox.root().join("README").is_file());
        assert!(!sandbox.root().join("tool-1.0").exists());
    }

    #[test]
    fn test_chmod_invalid_mode() {
        let (_dir, sandbox) = sandbox_with(&["bin/tool"]);
        assert!(matches!(
            do_chmod(&sandbox, "bin/*", "not-octal"),
            Err(PipelineError::InvalidMode(_))
        ));
        assert!(matches!(
            do_chmod(&sandbox, "missing/*", "0755"),
            Err(PipelineError::NoMatch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_chmod_applies() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, sandbox) = sandbox_with(&["bin/tool"]);
        let changed = do_chmod(&sandbox, "bin/*", "0755").unwrap();
        assert_eq!(changed, vec!["bin/tool"]);
        let mode = sandbox
            .root()
            .join("bin/tool")
            .metadata()
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_delete() {
        let (_dir, sandbox) = sandbox_with(&["a", "b/c"]);
        let removed = do_delete(&sandbox, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(removed, vec!["a", "b"]);
        assert!(!sandbox.root().join("a").exists());
        assert!(!sandbox.root().join("b").exists());
    }

    #[test]
    fn test_cleanup() {
        let (_dir, sandbox) = sandbox_with(&["LICENSE", "README.md", ".hidden", "keep.bin", "x.tmp"]);
        let removed = do_cleanup(&sandbox).unwrap();
        assert_eq!(removed, vec![".hidden", "LICENSE", "README.md", "x.tmp"]);
        assert!(sandbox.root().join("keep.bin").exists());
    }
}
