//! Progress and status reporting seam.

pub mod log;
pub mod reporter;

pub use log::{init_tracing, LogReporter, NullReporter};
pub use reporter::Reporter;
