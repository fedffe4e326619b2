//! Archive extraction.
//!
//! Formats are detected from the URL/file suffix. Extraction is
//! traversal-safe: any entry (or symlink target) whose normalized
//! destination escapes the extraction root is rejected. `.pkg`/`.msi`
//! files are never extracted; they escalate to the platform's native
//! installer.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("archive entry escapes extraction root: {0}")]
    PathTraversal(String),

    #[error("archive contains no files")]
    EmptyArchive,

    #[error("archive error: {0}")]
    Archive(String),

    #[error("no binary named '{0}' in extracted tree")]
    BinaryNotFound(String),

    #[error("multiple executable candidates: {0:?}; set binary_path to disambiguate")]
    AmbiguousBinary(Vec<String>),

    #[error("extraction cancelled")]
    Cancelled,
}

/// Supported archive formats, detected by suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    Zip,
    /// `.pkg` / `.msi`: handed to the OS installer, never extracted.
    SystemInstaller,
    RawBinary,
}

/// Detect the archive format from a path or URL suffix.
pub fn detect_format(name: &str) -> ArchiveFormat {
    // Strip query strings so URLs detect like file names.
    let clean = name.split(['?', '#']).next().unwrap_or(name).to_lowercase();

    if clean.ends_with(".tar.gz") || clean.ends_with(".tgz") {
        ArchiveFormat::TarGz
    } else if clean.ends_with(".tar.xz") || clean.ends_with(".txz") {
        ArchiveFormat::TarXz
    } else if clean.ends_with(".tar.bz2") || clean.ends_with(".tbz2") {
        ArchiveFormat::TarBz2
    } else if clean.ends_with(".tar") {
        ArchiveFormat::Tar
    } else if clean.ends_with(".zip") || clean.ends_with(".jar") {
        ArchiveFormat::Zip
    } else if clean.ends_with(".pkg") || clean.ends_with(".msi") {
        ArchiveFormat::SystemInstaller
    } else {
        ArchiveFormat::RawBinary
    }
}

/// Whether a URL points at something the extractor can unpack.
pub fn looks_like_archive(url: &str) -> bool {
    !matches!(
        detect_format(url),
        ArchiveFormat::RawBinary | ArchiveFormat::SystemInstaller
    )
}

/// Whether a URL points at a `.pkg`/`.msi` system installer.
pub fn is_system_installer(url: &str) -> bool {
    detect_format(url) == ArchiveFormat::SystemInstaller
}

/// Join an archive entry path onto the extraction root, rejecting
/// absolute paths and any `..` traversal.
fn safe_join(root: &Path, entry: &Path) -> Result<PathBuf, ExtractError> {
    let mut out = root.to_path_buf();
    for component in entry.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ExtractError::PathTraversal(
                    entry.to_string_lossy().to_string(),
                ))
            }
        }
    }
    if !out.starts_with(root) {
        return Err(ExtractError::PathTraversal(
            entry.to_string_lossy().to_string(),
        ));
    }
    Ok(out)
}

/// Validate a symlink target: relative, and resolving inside the root
/// from the link's location.
fn validate_link_target(
    root: &Path,
    link_path: &Path,
    target: &Path,
) -> Result<(), ExtractError> {
    if target.is_absolute() {
        return Err(ExtractError::PathTraversal(
            target.to_string_lossy().to_string(),
        ));
    }
    let base = link_path.parent().unwrap_or(root);
    let mut resolved = base.to_path_buf();
    for component in target.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(root) {
                    return Err(ExtractError::PathTraversal(
                        target.to_string_lossy().to_string(),
                    ));
                }
            }
            _ => {
                return Err(ExtractError::PathTraversal(
                    target.to_string_lossy().to_string(),
                ))
            }
        }
    }
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(ExtractError::PathTraversal(
            target.to_string_lossy().to_string(),
        ))
    }
}

/// Extract an archive into `dest_dir`, returning the number of files
/// written. The format is detected from `archive_path`'s suffix.
pub fn extract(
    archive_path: &Path,
    dest_dir: &Path,
    cancel: &CancellationToken,
) -> Result<usize, ExtractError> {
    let name = archive_path.to_string_lossy();
    match detect_format(&name) {
        ArchiveFormat::Tar => {
            let file = File::open(archive_path)?;
            extract_tar(BufReader::new(file), dest_dir, cancel)
        }
        ArchiveFormat::TarGz => {
            let file = File::open(archive_path)?;
            let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
            extract_tar(decoder, dest_dir, cancel)
        }
        ArchiveFormat::TarXz => {
            let file = File::open(archive_path)?;
            let decoder = xz2::read::XzDecoder::new(BufReader::new(file));
            extract_tar(decoder, dest_dir, cancel)
        }
        ArchiveFormat::TarBz2 => {
            let file = File::open(archive_path)?;
            let decoder = bzip2::read::BzDecoder::new(BufReader::new(file));
            extract_tar(decoder, dest_dir, cancel)
        }
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir, cancel),
        ArchiveFormat::SystemInstaller | ArchiveFormat::RawBinary => {
            Err(ExtractError::UnsupportedFormat(name.to_string()))
        }
    }
}

fn extract_tar<R: Read>(
    reader: R,
    dest_dir: &Path,
    cancel: &CancellationToken,
) -> Result<usize, ExtractError> {
    fs::create_dir_all(dest_dir)?;
    let mut archive = tar::Archive::new(reader);
    let mut count = 0usize;

    for entry in archive.entries()? {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = safe_join(dest_dir, &entry_path)?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let link_target = entry
                .link_name()?
                .ok_or_else(|| ExtractError::Archive("link entry without target".to_string()))?
                .into_owned();
            validate_link_target(dest_dir, &target, &link_target)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            #[cfg(unix)]
            {
                fs::remove_file(&target).ok();
                std::os::unix::fs::symlink(&link_target, &target)?;
            }
            #[cfg(not(unix))]
            {
                // Windows: materialize the link target as a copy later;
                // tar archives for windows tools rarely carry links.
                let _ = &link_target;
            }
            count += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
        count += 1;
    }

    if count == 0 {
        return Err(ExtractError::EmptyArchive);
    }
    Ok(count)
}

fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    cancel: &CancellationToken,
) -> Result<usize, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;
    fs::create_dir_all(dest_dir)?;
    let mut count = 0usize;

    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;

        // enclosed_name already rejects traversal; treat its absence as
        // a hostile entry rather than skipping silently.
        let relative = file
            .enclosed_name()
            .ok_or_else(|| ExtractError::PathTraversal(file.name().to_string()))?;
        let target = safe_join(dest_dir, &relative)?;

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut file, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        }
        count += 1;
    }

    if count == 0 {
        return Err(ExtractError::EmptyArchive);
    }
    Ok(count)
}

/// Whether a file has an execute bit (or an executable suffix on
/// Windows).
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.extension()
            .map(|e| e.eq_ignore_ascii_case("exe") || e.eq_ignore_ascii_case("bat"))
            .unwrap_or(false)
    }
}

/// Locate the installed binary inside an extracted tree.
///
/// With a hint: templates containing `{{` are rendered over
/// `{os, arch, version}` first, then resolved relative to the root. With
/// no hint: the unique executable file wins; several candidates is an
/// error listing them.
pub fn find_binary_in_dir(
    root: &Path,
    hint: Option<&str>,
    platform: &crate::types::Platform,
    version: &str,
) -> Result<PathBuf, ExtractError> {
    if let Some(hint) = hint.filter(|h| !h.is_empty()) {
        let rendered = if hint.contains("{{") {
            let ctx = serde_json::json!({
                "os": platform.os,
                "arch": platform.arch,
                "version": version,
            });
            crate::core::template::render_with(hint, &ctx)
                .map_err(|e| ExtractError::Archive(e.to_string()))?
        } else {
            hint.to_string()
        };

        let direct = safe_join(root, Path::new(&rendered))?;
        if direct.is_file() {
            return Ok(direct);
        }
        // A bare name may live one directory down.
        for entry in walkdir::WalkDir::new(root).into_iter().flatten() {
            if entry.file_type().is_file()
                && entry.file_name().to_string_lossy().as_ref() == rendered.as_str()
            {
                return Ok(entry.path().to_path_buf());
            }
        }
        return Err(ExtractError::BinaryNotFound(rendered));
    }

    let mut candidates: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file() && is_executable(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();

    match candidates.len() {
        0 => Err(ExtractError::BinaryNotFound("<any executable>".to_string())),
        1 => Ok(candidates.remove(0)),
        _ => Err(ExtractError::AmbiguousBinary(
            candidates
                .iter()
                .filter_map(|p| p.strip_prefix(root).ok())
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("x.tar.gz"), ArchiveFormat::TarGz);
        assert_eq!(detect_format("x.tgz"), ArchiveFormat::TarGz);
        assert_eq!(detect_format("x.tar.xz"), ArchiveFormat::TarXz);
        assert_eq!(detect_format("x.tar.bz2"), ArchiveFormat::TarBz2);
        assert_eq!(detect_format("x.tbz2"), ArchiveFormat::TarBz2);
        assert_eq!(detect_format("x.tar"), ArchiveFormat::Tar);
        assert_eq!(detect_format("x.zip"), ArchiveFormat::Zip);
        assert_eq!(detect_format("tool.jar"), ArchiveFormat::Zip);
        assert_eq!(detect_format("setup.pkg"), ArchiveFormat::SystemInstaller);
        assert_eq!(detect_format("setup.msi"), ArchiveFormat::SystemInstaller);
        assert_eq!(detect_format("jq-linux-amd64"), ArchiveFormat::RawBinary);
        assert_eq!(
            detect_format("https://e/x.ZIP?token=abc"),
            ArchiveFormat::Zip
        );
    }

    #[test]
    fn test_looks_like_archive() {
        assert!(looks_like_archive("https://e/helm.tar.gz"));
        assert!(!looks_like_archive("https://e/jq-linux-amd64"));
        assert!(!looks_like_archive("https://e/setup.msi"));
    }

    #[test]
    fn test_safe_join_rejects_traversal() {
        let root = Path::new("/sandbox");
        assert!(safe_join(root, Path::new("bin/tool")).is_ok());
        assert!(safe_join(root, Path::new("../evil")).is_err());
        assert!(safe_join(root, Path::new("/etc/passwd")).is_err());
        assert!(safe_join(root, Path::new("ok/../../evil")).is_err());
    }

    #[test]
    fn test_validate_link_target() {
        let root = Path::new("/sandbox");
        let link = root.join("bin/link");
        assert!(validate_link_target(root, &link, Path::new("../lib/real")).is_ok());
        assert!(validate_link_target(root, &link, Path::new("../../../etc/passwd")).is_err());
        assert!(validate_link_target(root, &link, Path::new("/etc/passwd")).is_err());
    }

    fn build_tar_gz(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        for (name, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            let gnu = header.as_gnu_mut().unwrap();
            let name_bytes = name.as_bytes();
            gnu.name[..name_bytes.len()].copy_from_slice(name_bytes);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extract_tar_gz_roundtrip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        std::fs::write(
            &archive,
            build_tar_gz(&[
                ("tool-1.0/bin/tool", b"#!/bin/sh\n", 0o755),
                ("tool-1.0/README", b"docs", 0o644),
            ]),
        )
        .unwrap();

        let dest = dir.path().join("out");
        let count = extract(&archive, &dest, &CancellationToken::new()).unwrap();
        assert_eq!(count, 2);
        assert!(dest.join("tool-1.0/bin/tool").is_file());
        assert!(is_executable(&dest.join("tool-1.0/bin/tool")));
    }

    #[test]
    fn test_extract_rejects_traversal_entry() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.tar.gz");
        std::fs::write(
            &archive,
            build_tar_gz(&[("../escape", b"boom", 0o644)]),
        )
        .unwrap();

        let dest = dir.path().join("out");
        let err = extract(&archive, &dest, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ExtractError::PathTraversal(_)));
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn test_extract_empty_archive() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("empty.tar.gz");
        std::fs::write(&archive, build_tar_gz(&[])).unwrap();
        let err = extract(&archive, dir.path().join("out").as_path(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ExtractError::EmptyArchive));
    }

    #[test]
    fn test_extract_cancelled() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        std::fs::write(&archive, build_tar_gz(&[("a", b"1", 0o644)])).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = extract(&archive, dir.path().join("out").as_path(), &cancel).unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_binary_unique_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        let bin = dir.path().join("bin/tool");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();

        let platform = crate::types::Platform::new("linux", "amd64");
        let found = find_binary_in_dir(dir.path(), None, &platform, "1.0.0").unwrap();
        assert_eq!(found, bin);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_binary_ambiguous() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        for name in ["a", "b"] {
            let p = dir.path().join(name);
            std::fs::write(&p, b"#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let platform = crate::types::Platform::new("linux", "amd64");
        let err = find_binary_in_dir(dir.path(), None, &platform, "1.0.0").unwrap_err();
        assert!(matches!(err, ExtractError::AmbiguousBinary(_)));
    }

    #[test]
    fn test_find_binary_with_templated_hint() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("linux-amd64")).unwrap();
        std::fs::write(dir.path().join("linux-amd64/helm"), b"bin").unwrap();

        let platform = crate::types::Platform::new("linux", "amd64");
        let found = find_binary_in_dir(
            dir.path(),
            Some("{{os}}-{{arch}}/helm"),
            &platform,
            "3.14.0",
        )
        .unwrap();
        assert_eq!(found, dir.path().join("linux-amd64/helm"));
    }
}
