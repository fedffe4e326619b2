//! Post-processing pipeline: ordered, platform-guarded, sandboxed
//! filesystem expressions.
//!
//! A pipeline is a list of expressions such as
//! `"!windows-*: chmod(glob('bin/*'), '0755')"`. The optional
//! `"platform-glob:"` prefix gates each step (a leading `!` inverts the
//! match). Steps evaluate in order inside a [`Sandbox`]; the first
//! failure is sticky: later steps are skipped and the install fails
//! with that step's error.

pub mod ops;
pub mod sandbox;

use std::sync::{Arc, Mutex};

use minijinja::value::Value;
use minijinja::{Environment, Error as JinjaError, ErrorKind, UndefinedBehavior};
use thiserror::Error;

pub use sandbox::Sandbox;

use crate::types::Platform;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("path escapes the sandbox: {0}")]
    SandboxEscape(String),

    #[error("no matches for '{pattern}'")]
    NoMatch { pattern: String },

    #[error("invalid file mode '{0}'")]
    InvalidMode(String),

    #[error("{0}")]
    UserFail(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error(transparent)]
    Extract(crate::io::extract::ExtractError),

    #[error("pipeline expression '{expr}' failed: {message}")]
    Eval { expr: String, message: String },
}

/// One parsed pipeline step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Platform glob gating this step; `None` runs everywhere.
    pub guard: Option<String>,
    pub expr: String,
}

impl Step {
    /// Split an optional `"platform-glob:"` prefix off an expression. The
    /// prefix must look like a platform glob (no parens, quotes, or
    /// spaces) so expressions containing `:` elsewhere parse intact.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some((prefix, rest)) = raw.split_once(':') {
            let candidate = prefix.trim();
            let looks_like_guard = !candidate.is_empty()
                && candidate
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '!' | '_'));
            if looks_like_guard {
                return Self {
                    guard: Some(candidate.to_string()),
                    expr: rest.trim().to_string(),
                };
            }
        }
        Self {
            guard: None,
            expr: raw.to_string(),
        }
    }

    /// Whether this step runs on a platform. A `!` prefix inverts the
    /// glob match.
    pub fn applies_to(&self, platform: &Platform) -> bool {
        match self.guard.as_deref() {
            None => true,
            Some(guard) => {
                let (negate, glob) = match guard.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, guard),
                };
                platform.matches_glob(glob) != negate
            }
        }
    }
}

/// Shared failure slot: ops record their typed error here so evaluation
/// failures surface as [`PipelineError`] rather than a stringly template
/// error.
type ErrSlot = Arc<Mutex<Option<PipelineError>>>;

fn record(slot: &ErrSlot, err: PipelineError) -> JinjaError {
    let message = err.to_string();
    let mut guard = slot.lock().expect("error slot poisoned");
    if guard.is_none() {
        *guard = Some(err);
    }
    JinjaError::new(ErrorKind::InvalidOperation, message)
}

fn build_env<'a>(sandbox: Arc<Sandbox>, slot: ErrSlot) -> Environment<'a> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    {
        let sandbox = sandbox.clone();
        let slot = slot.clone();
        env.add_function(
            "glob",
            move |pattern: String, kind: Option<String>| -> Result<Value, JinjaError> {
                ops::glob_paths(&sandbox, &pattern, kind.as_deref())
                    .map(|paths| Value::from_serialize(&paths))
                    .map_err(|e| record(&slot, e))
            },
        );
    }
    {
        let sandbox = sandbox.clone();
        let slot = slot.clone();
        env.add_function(
            "move",
            move |src: Value, dst: String| -> Result<Value, JinjaError> {
                let src = single_path(&src).map_err(|e| record(&slot, e))?;
                ops::do_move(&sandbox, &src, &dst)
                    .map(Value::from)
                    .map_err(|e| record(&slot, e))
            },
        );
    }
    {
        let sandbox = sandbox.clone();
        let slot = slot.clone();
        env.add_function("chdir", move |pattern: String| -> Result<Value, JinjaError> {
            ops::do_chdir(&sandbox, &pattern)
                .map(Value::from)
                .map_err(|e| record(&slot, e))
        });
    }
    {
        let sandbox = sandbox.clone();
        let slot = slot.clone();
        env.add_function(
            "chmod",
            move |target: Value, mode: String| -> Result<Value, JinjaError> {
                let mut changed = Vec::new();
                for pattern in path_list(&target).map_err(|e| record(&slot, e))? {
                    changed.extend(
                        ops::do_chmod(&sandbox, &pattern, &mode).map_err(|e| record(&slot, e))?,
                    );
                }
                Ok(Value::from_serialize(&changed))
            },
        );
    }
    {
        let sandbox = sandbox.clone();
        let slot = slot.clone();
        env.add_function("delete", move |target: Value| -> Result<Value, JinjaError> {
            let targets = match target.as_str() {
                // Pattern form: no match is an error.
                Some(pattern) => {
                    let matches = ops::glob_paths(&sandbox, pattern, None)
                        .map_err(|e| record(&slot, e))?;
                    if matches.is_empty() {
                        return Err(record(
                            &slot,
                            PipelineError::NoMatch {
                                pattern: pattern.to_string(),
                            },
                        ));
                    }
                    matches
                }
                None => path_list(&target).map_err(|e| record(&slot, e))?,
            };
            ops::do_delete(&sandbox, &targets)
                .map(|removed| Value::from_serialize(&removed))
                .map_err(|e| record(&slot, e))
        });
    }
    {
        let sandbox = sandbox.clone();
        let slot = slot.clone();
        env.add_function(
            "unarchive",
            move |path: String| -> Result<Value, JinjaError> {
                ops::do_unarchive(&sandbox, &path)
                    .map(|n| Value::from(n as u64))
                    .map_err(|e| record(&slot, e))
            },
        );
    }
    {
        let slot = slot.clone();
        env.add_function("cleanup", move || -> Result<Value, JinjaError> {
            ops::do_cleanup(&sandbox)
                .map(|removed| Value::from_serialize(&removed))
                .map_err(|e| record(&slot, e))
        });
    }
    env.add_function("log", |level: String, message: String| -> Value {
        match level.as_str() {
            "debug" => tracing::debug!("{message}"),
            "warn" | "warning" => tracing::warn!("{message}"),
            "error" => tracing::error!("{message}"),
            _ => tracing::info!("{message}"),
        }
        Value::from(true)
    });
    {
        let slot = slot.clone();
        env.add_function("fail", move |message: String| -> Result<Value, JinjaError> {
            Err(record(&slot, PipelineError::UserFail(message)))
        });
    }

    env
}

fn single_path(value: &Value) -> Result<String, PipelineError> {
    if let Some(s) = value.as_str() {
        return Ok(s.to_string());
    }
    let list = path_list(value)?;
    match list.as_slice() {
        [one] => Ok(one.clone()),
        other => Err(PipelineError::Eval {
            expr: String::new(),
            message: format!("expected one path, got {}", other.len()),
        }),
    }
}

fn path_list(value: &Value) -> Result<Vec<String>, PipelineError> {
    if let Some(s) = value.as_str() {
        return Ok(vec![s.to_string()]);
    }
    let iter = value.try_iter().map_err(|e| PipelineError::Eval {
        expr: String::new(),
        message: e.to_string(),
    })?;
    let mut out = Vec::new();
    for item in iter {
        match item.as_str() {
            Some(s) => out.push(s.to_string()),
            None => {
                return Err(PipelineError::Eval {
                    expr: String::new(),
                    message: format!("expected path strings, got {item}"),
                })
            }
        }
    }
    Ok(out)
}

/// Evaluate a pipeline inside a sandbox. Stops at the first failing step.
pub fn run(
    expressions: &[String],
    sandbox: &Sandbox,
    platform: &Platform,
    name: &str,
    version: &str,
) -> Result<(), PipelineError> {
    let sandbox = Arc::new(sandbox.clone());
    for raw in expressions {
        let step = Step::parse(raw);
        if !step.applies_to(platform) {
            tracing::debug!("skipping pipeline step for other platform: {raw}");
            continue;
        }

        let slot: ErrSlot = Arc::new(Mutex::new(None));
        let env = build_env(sandbox.clone(), slot.clone());
        let ctx = minijinja::context! {
            os => platform.os.clone(),
            arch => platform.arch.clone(),
            name => name,
            version => version,
        };

        let result = env
            .compile_expression(&step.expr)
            .and_then(|compiled| compiled.eval(ctx));

        if let Err(eval_err) = result {
            let typed = slot.lock().expect("error slot poisoned").take();
            return Err(typed.unwrap_or(PipelineError::Eval {
                expr: step.expr.clone(),
                message: eval_err.to_string(),
            }));
        }
    }
    Ok(())
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

    fn linux() -> Platform {
        Platform::new("linux", "amd64")
    }

    #[test]
    fn test_step_parse_guard() {
        let step = Step::parse("!windows-*: chmod(glob('bin/*'), '0755')");
        assert_eq!(step.guard.as_deref(), Some("!windows-*"));
        assert_eq!(step.expr, "chmod(glob('bin/*'), '0755')");

        let bare = Step::parse("move('a', 'b')");
        assert_eq!(bare.guard, None);

        // A colon inside the expression is not a guard.
        let tricky = Step::parse("log('info', 'a:b')");
        assert_eq!(tricky.guard, None);
    }

    #[test]
    fn test_step_applies_to() {
        let step = Step::parse("windows-*: move('tool.exe', 'tool')");
        assert!(step.applies_to(&Platform::new("windows", "amd64")));
        assert!(!step.applies_to(&linux()));

        let negated = Step::parse("!windows-*: chmod(glob('bin/*'), '0755')");
        assert!(negated.applies_to(&linux()));
        assert!(!negated.applies_to(&Platform::new("windows", "amd64")));
    }

    #[test]
    fn test_run_move_and_delete() {
        let (_dir, sandbox) = sandbox_with(&["dist/tool", "dist/README"]);
        run(
            &[
                "move('dist/tool', 'tool')".to_string(),
                "delete('dist')".to_string(),
            ],
            &sandbox,
            &linux(),
            "tool",
            "1.0.0",
        )
        .unwrap();
        assert!(sandbox.root().join("tool").is_file());
        assert!(!sandbox.root().join("dist").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_chmod_over_glob() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, sandbox) = sandbox_with(&["bin/a", "bin/b"]);
        run(
            &["chmod(glob('bin/*'), '0755')".to_string()],
            &sandbox,
            &linux(),
            "tool",
            "1.0.0",
        )
        .unwrap();
        for name in ["a", "b"] {
            let mode = sandbox
                .root()
                .join("bin")
                .join(name)
                .metadata()
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_sandbox_escape_is_fatal_and_sticky() {
        let (_dir, sandbox) = sandbox_with(&["safe"]);
        let err = run(
            &[
                "move('../evil', 'x')".to_string(),
                "delete('safe')".to_string(),
            ],
            &sandbox,
            &linux(),
            "tool",
            "1.0.0",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::SandboxEscape(_)));
        // The later step never ran.
        assert!(sandbox.root().join("safe").exists());
    }

    #[test]
    fn test_fail_stops_pipeline() {
        let (_dir, sandbox) = sandbox_with(&["keep"]);
        let err = run(
            &[
                "fail('unsupported layout')".to_string(),
                "delete('keep')".to_string(),
            ],
            &sandbox,
            &linux(),
            "tool",
            "1.0.0",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::UserFail(m) if m == "unsupported layout"));
        assert!(sandbox.root().join("keep").exists());
    }

    #[test]
    fn test_guarded_step_skipped() {
        let (_dir, sandbox) = sandbox_with(&["tool.exe"]);
        run(
            &["windows-*: delete('tool.exe')".to_string()],
            &sandbox,
            &linux(),
            "tool",
            "1.0.0",
        )
        .unwrap();
        assert!(sandbox.root().join("tool.exe").exists());
    }

    #[test]
    fn test_unarchive_in_pipeline() {
        let (_dir, sandbox) = sandbox_with(&[]);
        // Build a small zip in the sandbox.
        let zip_path = sandbox.root().join("inner.zip");
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("nested.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"hello").unwrap();
        writer.finish().unwrap();

        run(
            &["unarchive('inner.zip')".to_string()],
            &sandbox,
            &linux(),
            "tool",
            "1.0.0",
        )
        .unwrap();
        assert!(sandbox.root().join("nested.txt").is_file());
        assert!(!zip_path.exists());
    }
}
