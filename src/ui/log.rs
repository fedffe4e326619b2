//! Tracing-backed reporter implementations.

use tracing_subscriber::EnvFilter;

use super::Reporter;

/// Install the default tracing subscriber, filtered by `RUST_LOG`
/// (default `info`). Call once from the binary entry point; repeated
/// calls are ignored.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Reports through `tracing`; the default for non-interactive use.
#[derive(Debug, Clone, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn downloading(&self, name: &str, version: &str, current: u64, total: u64) {
        if total > 0 && (current == total || current == 0) {
            tracing::debug!("{name} {version}: downloaded {current}/{total} bytes");
        }
    }

    fn installing(&self, name: &str, version: &str) {
        tracing::info!("installing {name} {version}");
    }

    fn done(&self, name: &str, version: &str, detail: &str) {
        tracing::info!("{name} {version}: {detail}");
    }

    fn failed(&self, name: &str, version: &str, reason: &str) {
        tracing::error!("{name} {version}: {reason}");
    }

    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    fn summary(&self, count: usize, failed: usize, elapsed_secs: f64) {
        tracing::info!("{count} tools processed, {failed} failed, in {elapsed_secs:.1}s");
    }
}

/// Discards everything; used in tests.
#[derive(Debug, Clone, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn downloading(&self, _: &str, _: &str, _: u64, _: u64) {}
    fn installing(&self, _: &str, _: &str) {}
    fn done(&self, _: &str, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: usize, _: f64) {}
}
