//! Safe extraction of downloaded release archives (zip, tar.gz).
//!
//! Every entry name is checked before anything touches the disk. If any
//! entry is absolute, carries a drive prefix, contains a `..` component or
//! is a link, the whole archive is rejected with
//! [`ReleaseError::SafeExtractViolation`] and nothing is written.
//!
//! | Format | Detected by |
//! |--------|-------------|
//! | zip | `.zip` suffix, or `PK\x03\x04` magic |
//! | tar.gz | `.tar.gz` / `.tgz` suffix, or gzip magic `1f 8b` |

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{ReleaseError, Result};

/// Maximum decompressed bytes written for a single entry (zip-bomb guard).
const MAX_ENTRY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Pick the format from the asset name, falling back to magic bytes.
    pub fn detect(name: &str, bytes: &[u8]) -> Option<ArchiveKind> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            return Some(ArchiveKind::Zip);
        }
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            return Some(ArchiveKind::TarGz);
        }
        if bytes.starts_with(b"PK\x03\x04") {
            Some(ArchiveKind::Zip)
        } else if bytes.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Entries that an archive would produce, in archive order.
#[derive(Debug, Clone, Default)]
pub struct ArchiveListing {
    pub files: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
}

/// Normalize an entry name to a path relative to the destination.
///
/// Returns `Ok(None)` for entries that only name the archive root (`./`).
pub fn safe_relative_path(archive: &str, name: &str) -> Result<Option<PathBuf>> {
    let violation = || ReleaseError::SafeExtractViolation {
        archive: archive.to_string(),
        entry: name.to_string(),
    };
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) || normalized.contains('\0') {
        return Err(violation());
    }
    let mut out = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(violation()),
            p => out.push(p),
        }
    }
    if out.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

fn detect_or_err(name: &str, bytes: &[u8]) -> Result<ArchiveKind> {
    ArchiveKind::detect(name, bytes)
        .ok_or_else(|| ReleaseError::Archive(format!("{}: not a zip or tar.gz archive", name)))
}

/// Walk every entry and apply the path checks without writing anything.
pub fn validate_archive(name: &str, bytes: &[u8]) -> Result<ArchiveListing> {
    match detect_or_err(name, bytes)? {
        ArchiveKind::Zip => list_zip(name, bytes),
        ArchiveKind::TarGz => list_tar_gz(name, bytes),
    }
}

/// Validate the whole archive, then extract it under `dest`.
pub fn extract_bytes_to(dest: &Path, name: &str, bytes: &[u8]) -> Result<ArchiveListing> {
    let kind = detect_or_err(name, bytes)?;
    let listing = validate_archive(name, bytes)?;
    std::fs::create_dir_all(dest).map_err(|e| ReleaseError::io(dest, e))?;
    match kind {
        ArchiveKind::Zip => unpack_zip(dest, name, bytes)?,
        ArchiveKind::TarGz => unpack_tar_gz(dest, name, bytes)?,
    }
    debug!(
        archive = name,
        dest = %dest.display(),
        files = listing.files.len(),
        "extracted archive"
    );
    Ok(listing)
}

// ═══════════════════════════════════════════════════════════════════════
// zip
// ═══════════════════════════════════════════════════════════════════════

fn mode_is_link(mode: Option<u32>) -> bool {
    mode.map(|m| m & S_IFMT == S_IFLNK).unwrap_or(false)
}

fn list_zip(archive_name: &str, bytes: &[u8]) -> Result<ArchiveListing> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut listing = ArchiveListing::default();
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        let raw = file.name().to_string();
        if mode_is_link(file.unix_mode()) {
            return Err(ReleaseError::SafeExtractViolation {
                archive: archive_name.to_string(),
                entry: raw,
            });
        }
        let Some(rel) = safe_relative_path(archive_name, &raw)? else {
            continue;
        };
        if file.is_dir() {
            listing.dirs.push(rel);
        } else {
            listing.files.push(rel);
        }
    }
    Ok(listing)
}

fn unpack_zip(dest: &Path, archive_name: &str, bytes: &[u8]) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let raw = file.name().to_string();
        let Some(rel) = safe_relative_path(archive_name, &raw)? else {
            continue;
        };
        let out = dest.join(&rel);
        if file.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| ReleaseError::io(&out, e))?;
            continue;
        }
        write_entry(&out, &mut file, &raw)?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// tar.gz
// ═══════════════════════════════════════════════════════════════════════

fn tar_archive(bytes: &[u8]) -> tar::Archive<GzDecoder<&[u8]>> {
    tar::Archive::new(GzDecoder::new(bytes))
}

fn tar_err(archive_name: &str, err: std::io::Error) -> ReleaseError {
    ReleaseError::Archive(format!("{}: {}", archive_name, err))
}

fn list_tar_gz(archive_name: &str, bytes: &[u8]) -> Result<ArchiveListing> {
    let mut archive = tar_archive(bytes);
    let mut listing = ArchiveListing::default();
    let entries = archive.entries().map_err(|e| tar_err(archive_name, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| tar_err(archive_name, e))?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(ReleaseError::SafeExtractViolation {
                archive: archive_name.to_string(),
                entry: raw,
            });
        }
        let Some(rel) = safe_relative_path(archive_name, &raw)? else {
            continue;
        };
        if entry_type.is_dir() {
            listing.dirs.push(rel);
        } else if entry_type.is_file() {
            listing.files.push(rel);
        }
    }
    Ok(listing)
}

fn unpack_tar_gz(dest: &Path, archive_name: &str, bytes: &[u8]) -> Result<()> {
    let mut archive = tar_archive(bytes);
    let entries = archive.entries().map_err(|e| tar_err(archive_name, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| tar_err(archive_name, e))?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(rel) = safe_relative_path(archive_name, &raw)? else {
            continue;
        };
        let out = dest.join(&rel);
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| ReleaseError::io(&out, e))?;
        } else if entry_type.is_file() {
            write_entry(&out, &mut entry, &raw)?;
        }
    }
    Ok(())
}

fn write_entry<R: Read>(out: &Path, reader: &mut R, raw: &str) -> Result<()> {
    write_capped(out, reader, raw, MAX_ENTRY_BYTES)
}

/// Write at most `limit` bytes. One byte past the limit is an error.
fn write_capped<R: Read>(out: &Path, reader: &mut R, raw: &str, limit: u64) -> Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ReleaseError::io(parent, e))?;
    }
    let mut file = std::fs::File::create(out).map_err(|e| ReleaseError::io(out, e))?;
    let written = std::io::copy(&mut reader.take(limit + 1), &mut file)
        .map_err(|e| ReleaseError::io(out, e))?;
    if written > limit {
        return Err(ReleaseError::Archive(format!(
            "entry {} exceeds size limit ({} bytes)",
            raw, limit
        )));
    }
    Ok(())
}
