//! Archive extraction module
//!
//! Unpacks an image archive under a destination root. Every entry is checked
//! against the root before anything is written for it; an entry that would
//! land outside (zip slip) aborts the whole extraction.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use super::archive::ArchiveError;
use crate::fs::{is_within, normalize_path};

/// Information about an extracted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Path relative to extraction root
    pub relative_path: PathBuf,
    /// Absolute path on disk
    pub absolute_path: PathBuf,
    pub is_dir: bool,
    /// Whether this is an executable
    pub is_executable: bool,
}

/// Extract the archive at `archive_path` into `dest_dir`.
///
/// Entries are processed strictly in manifest order. Directory entries are
/// created (with parents); file entries get their parents created, their
/// content streamed into a fresh file, and their recorded permission bits
/// applied. Symlink entries are written as regular files, so extraction never
/// creates links that later entries could be redirected through.
///
/// Returns the extracted entries in the order they were written.
///
/// # Errors
///
/// Returns [`ArchiveError::PathTraversal`] as soon as an entry's name,
/// joined to `dest_dir` and normalized, is not strictly inside `dest_dir`
/// (`..` segments, absolute names). Entries before it stay on disk; nothing
/// after it is written. Any IO or archive error also aborts immediately.
pub fn unpack(archive_path: &Path, dest_dir: &Path) -> Result<Vec<ExtractedFile>, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    fs::create_dir_all(dest_dir)?;
    // "." or "a/.." would normalize to an empty root.
    let root = normalize_path(&std::path::absolute(dest_dir)?);
    let mut extracted_files = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        // Sanitize path to prevent Zip Slip
        let absolute_path = normalize_path(&root.join(entry.name()));
        if !is_within(&root, &absolute_path) {
            return Err(ArchiveError::PathTraversal {
                entry: entry.name().to_string(),
                destination: dest_dir.to_path_buf(),
            });
        }
        let relative_path = absolute_path
            .strip_prefix(&root)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if entry.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            extracted_files.push(ExtractedFile {
                relative_path,
                absolute_path,
                is_dir: true,
                is_executable: false,
            });
            continue;
        }

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mode = entry.unix_mode().map(|m| m & 0o7777);
        let mut outfile = create_file(&absolute_path, mode)?;
        io::copy(&mut entry, &mut outfile)?;
        drop(outfile);

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode))?;
        }

        extracted_files.push(ExtractedFile {
            relative_path,
            absolute_path,
            is_dir: false,
            is_executable: mode.is_some_and(|m| m & 0o111 != 0),
        });
    }

    debug!(
        "Extracted {} entries from {} into {}",
        extracted_files.len(),
        archive_path.display(),
        dest_dir.display()
    );
    Ok(extracted_files)
}

fn create_file(path: &Path, mode: Option<u32>) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    options.open(path)
}
