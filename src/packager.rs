//! Directory → single archive packaging for publishing.
//!
//! The tree is enumerated through a [`FilesLister`] (default
//! [`WalkdirLister`]). Entries are written in lexicographic path order with
//! fixed timestamps and modes, so packing unchanged content twice yields
//! byte-identical archives. The archive is written to a temp file next to
//! the destination and persisted only once complete.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ReleaseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Infer from a destination file name (`.zip`, `.tar.gz`, `.tgz`).
    pub fn from_path(path: &Path) -> Option<ArchiveFormat> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar.gz" | "tgz" | "targz" => Ok(ArchiveFormat::TarGz),
            other => Err(format!(
                "unknown archive format '{}'. Must be zip or tar.gz.",
                other
            )),
        }
    }
}

/// Enumerates the regular files to include in an archive.
///
/// Implementations return paths relative to `root`, sorted.
pub trait FilesLister {
    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>>;
}

/// Recursive `walkdir` listing of regular files.
#[derive(Debug, Clone, Default)]
pub struct WalkdirLister {
    pub follow_symlinks: bool,
}

impl FilesLister for WalkdirLister {
    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            files.push(rel.to_path_buf());
        }
        files.sort();
        Ok(files)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Skip `*.zip` / `*.tar.gz` / `*.tgz` files already in the tree.
    pub skip_existing_archives: bool,
    /// Glob patterns (relative to the source root) to leave out.
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackOutput {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub entries: usize,
    pub size: u64,
    pub sha256: String,
}

/// Pack every regular file under `src` into `dest`.
pub fn pack(src: &Path, dest: &Path, format: ArchiveFormat) -> Result<PathBuf> {
    let out = pack_with(&WalkdirLister::default(), src, dest, format, &PackOptions::default())?;
    Ok(out.path)
}

pub fn pack_with(
    lister: &dyn FilesLister,
    src: &Path,
    dest: &Path,
    format: ArchiveFormat,
    opts: &PackOptions,
) -> Result<PackOutput> {
    if !src.is_dir() {
        return Err(ReleaseError::io(
            src,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "source directory does not exist",
            ),
        ));
    }
    let dest_dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dest_dir).map_err(|e| ReleaseError::io(&dest_dir, e))?;

    let src_canon = src.canonicalize().map_err(|e| ReleaseError::io(src, e))?;
    let dest_canon = dest_dir
        .canonicalize()
        .map_err(|e| ReleaseError::io(&dest_dir, e))?
        .join(dest.file_name().unwrap_or_default());

    let excludes = build_globset(&opts.exclude_globs)?;

    // Listing happens before the temp file exists so it can never be picked up.
    let mut files = Vec::new();
    for rel in lister.list_files(src)? {
        if src_canon.join(&rel) == dest_canon {
            continue;
        }
        let rel_str = archive_name(&rel);
        if opts.skip_existing_archives && looks_like_archive(&rel_str) {
            debug!(file = %rel_str, "skipping existing archive");
            continue;
        }
        if excludes.is_match(&rel_str) {
            continue;
        }
        files.push((rel, rel_str));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));

    let mut tmp = tempfile::Builder::new()
        .prefix(".pack-")
        .tempfile_in(&dest_dir)
        .map_err(|e| ReleaseError::io(&dest_dir, e))?;

    match format {
        ArchiveFormat::Zip => write_zip(tmp.as_file_mut(), src, &files)?,
        ArchiveFormat::TarGz => write_tar_gz(tmp.as_file_mut(), src, &files)?,
    }

    let (size, sha256) = digest_file(tmp.as_file_mut()).map_err(|e| ReleaseError::io(dest, e))?;
    tmp.persist(dest)
        .map_err(|e| ReleaseError::io(dest, e.error))?;

    info!(
        src = %src.display(),
        dest = %dest.display(),
        entries = files.len(),
        size,
        "packed artifact"
    );

    Ok(PackOutput {
        path: dest.to_path_buf(),
        format,
        entries: files.len(),
        size,
        sha256,
    })
}

/// Forward-slash entry name for a relative path.
fn archive_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn looks_like_archive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".zip") || lower.ends_with(".tar.gz") || lower.ends_with(".tgz")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ReleaseError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ReleaseError::Config(format!("invalid exclude globs: {}", e)))
}

fn write_zip(out: &mut File, src: &Path, files: &[(PathBuf, String)]) -> Result<()> {
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    let mut zip = zip::ZipWriter::new(out);
    for (rel, name) in files {
        let path = src.join(rel);
        let mut input = File::open(&path).map_err(|e| ReleaseError::io(&path, e))?;
        zip.start_file(name.as_str(), options)?;
        std::io::copy(&mut input, &mut zip).map_err(|e| ReleaseError::io(&path, e))?;
    }
    zip.finish()?;
    Ok(())
}

fn write_tar_gz(out: &mut File, src: &Path, files: &[(PathBuf, String)]) -> Result<()> {
    let encoder = flate2::write::GzEncoder::new(out, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (rel, name) in files {
        let path = src.join(rel);
        let input = File::open(&path).map_err(|e| ReleaseError::io(&path, e))?;
        let len = input
            .metadata()
            .map_err(|e| ReleaseError::io(&path, e))?
            .len();
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(len);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder
            .append_data(&mut header, name, input)
            .map_err(|e| ReleaseError::io(&path, e))?;
    }
    let encoder = builder
        .into_inner()
        .map_err(|e| ReleaseError::Archive(format!("tar finish: {}", e)))?;
    let out = encoder
        .finish()
        .map_err(|e| ReleaseError::Archive(format!("gzip finish: {}", e)))?;
    out.flush()
        .map_err(|e| ReleaseError::Archive(format!("flush: {}", e)))?;
    Ok(())
}

fn digest_file(file: &mut File) -> std::io::Result<(u64, String)> {
    file.flush()?;
    file.seek(SeekFrom::Start(0))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}
