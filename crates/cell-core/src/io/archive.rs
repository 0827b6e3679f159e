//! Shared archive types and manifest listing.
//!
//! Images are zip containers with deflate-compressed entries. Entry names
//! always use `/` separators, regardless of platform.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] ZipError),

    /// A pack input could not be opened or inspected.
    #[error("cannot read {}: {source}", .path.display())]
    Source { path: PathBuf, source: io::Error },

    /// An entry resolves outside the extraction root.
    #[error("illegal file path in archive: '{entry}' escapes {}", .destination.display())]
    PathTraversal { entry: String, destination: PathBuf },
}

impl ArchiveError {
    /// `true` for [`ArchiveError::PathTraversal`].
    pub fn is_path_traversal(&self) -> bool {
        matches!(self, Self::PathTraversal { .. })
    }
}

/// One entry of an archive, as recorded in its central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Entry name, exactly as stored.
    pub path: String,
    pub is_dir: bool,
    /// Unix permission bits, when the archive carries them.
    pub mode: Option<u32>,
    /// Uncompressed size in bytes.
    pub size: u64,
}

/// List the entries of an archive in manifest order without extracting it.
///
/// # Errors
///
/// Fails if the archive cannot be opened or its directory is corrupt.
pub fn list_entries(archive_path: &Path) -> Result<Vec<ManifestEntry>, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        entries.push(ManifestEntry {
            path: entry.name().to_string(),
            is_dir: entry.is_dir(),
            mode: entry.unix_mode().map(|m| m & 0o7777),
            size: entry.size(),
        });
    }
    Ok(entries)
}

/// Join path components into an archive entry name with `/` separators.
pub(crate) fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_uses_forward_slashes() {
        assert_eq!(entry_name(Path::new("cell/artifacts/bal/mod.bal")), "cell/artifacts/bal/mod.bal");
        assert_eq!(entry_name(Path::new("./cell/x")), "cell/x");
    }

    #[test]
    fn test_list_entries_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_entries(&dir.path().join("missing.zip")).unwrap_err();
        assert!(matches!(err, ArchiveError::Io(_)));
    }

    #[test]
    fn test_list_entries_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        assert!(matches!(list_entries(&path), Err(ArchiveError::Zip(_))));
    }
}
