//! Cross-cutting errors for install and lock flows.

use thiserror::Error;

use crate::core::lockfile::LockfileError;
use crate::core::manifest::ManifestError;
use crate::core::resolver::ResolveError;
use crate::core::template::TemplateError;
use crate::io::checksum::ChecksumError;
use crate::io::download::DownloadError;
use crate::io::extract::ExtractError;
use crate::pipeline::PipelineError;
use crate::sources::SourceError;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("unknown package '{0}'")]
    UnknownPackage(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("install finalization failed: {0}")]
    FinalizeIo(String),

    #[error("install cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
