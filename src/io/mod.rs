//! Network and filesystem plumbing: downloads, checksum discovery,
//! archive extraction.

pub mod checksum;
pub mod download;
pub mod extract;

pub use download::{DownloadError, DownloadRequest};
pub use extract::{ArchiveFormat, ExtractError};
