//! Reporter trait for dependency injection.
//!
//! Core logic reports progress and status through this trait without
//! being coupled to a TUI, GUI, or plain-text front end.

pub trait Reporter: Send + Sync {
    /// Updates the progress of a download. `total == 0` means unknown.
    fn downloading(&self, name: &str, version: &str, current: u64, total: u64);

    /// Updates the state of a tool to 'installing'.
    fn installing(&self, name: &str, version: &str);

    /// Marks a tool operation as successfully completed.
    fn done(&self, name: &str, version: &str, detail: &str);

    /// Marks a tool operation as failed with a specific reason.
    fn failed(&self, name: &str, version: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, failed: usize, elapsed_secs: f64);
}
