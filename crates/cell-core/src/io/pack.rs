//! Archive packaging.
//!
//! Traversal and writing are separate steps: [`collect_entries`] lazily
//! describes what goes into the archive, [`write_entries`] writes a sequence
//! of descriptors. [`pack`] composes the two.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::archive::{ArchiveError, entry_name};

/// Default mode for platforms without Unix permission bits.
#[cfg(not(unix))]
const DEFAULT_MODE: u32 = 0o644;

/// Above this size an entry needs ZIP64 extensions.
const LARGE_FILE_THRESHOLD: u64 = 0xFFFF_FFFF;

/// A file scheduled for packing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Where the content is read from.
    pub source: PathBuf,
    /// Name of the entry inside the archive.
    pub name: String,
    /// Permission bits recorded for the entry.
    pub mode: u32,
    pub size: u64,
}

type EntryIter<'a> = Box<dyn Iterator<Item = Result<PackEntry, ArchiveError>> + 'a>;

/// Describe the archive entries for `dirs` followed by `files`.
///
/// Each directory root is walked recursively (in file-name order) and yields
/// one entry per non-directory, named relative to the root's parent so the
/// root folder itself appears at the top of the archive. Explicit files are
/// named by their path exactly as given.
///
/// The iterator is lazy: nothing is read until it is advanced, and it cannot
/// be restarted.
pub fn collect_entries<'a>(files: &'a [PathBuf], dirs: &'a [PathBuf]) -> EntryIter<'a> {
    let from_dirs = dirs.iter().flat_map(|root| walk_root(root));
    let from_files = files
        .iter()
        .map(|file| describe(file, file.to_string_lossy().into_owned()));
    Box::new(from_dirs.chain(from_files))
}

fn walk_root(root: &Path) -> EntryIter<'static> {
    // "." and ".." have no final component to preserve; resolve them first.
    let root = if root.file_name().is_some() {
        root.to_path_buf()
    } else {
        match root.canonicalize() {
            Ok(resolved) => resolved,
            Err(source) => {
                return Box::new(std::iter::once(Err(ArchiveError::Source {
                    path: root.to_path_buf(),
                    source,
                })));
            }
        }
    };
    let base = root.parent().map(Path::to_path_buf).unwrap_or_default();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    Box::new(walker.filter_map(move |next| {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map_or_else(|| root.clone(), Path::to_path_buf);
                return Some(Err(ArchiveError::Source {
                    path,
                    source: io::Error::from(err),
                }));
            }
        };
        if entry.file_type().is_dir() {
            return None;
        }
        let relative = entry.path().strip_prefix(&base).unwrap_or(entry.path());
        Some(describe(entry.path(), entry_name(relative)))
    }))
}

fn describe(source: &Path, name: String) -> Result<PackEntry, ArchiveError> {
    let meta = fs::metadata(source).map_err(|err| ArchiveError::Source {
        path: source.to_path_buf(),
        source: err,
    })?;

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o7777
    };
    #[cfg(not(unix))]
    let mode = DEFAULT_MODE;

    Ok(PackEntry {
        source: source.to_path_buf(),
        name,
        mode,
        size: meta.len(),
    })
}

/// Write `entries` into a new archive at `dest`, in order.
///
/// Creates or truncates `dest`. Stops at the first error, whether it comes
/// from the entry sequence itself or from writing; the partially written
/// archive is left behind.
///
/// # Errors
///
/// Returns the first traversal, open, or write error encountered.
pub fn write_entries<I>(dest: &Path, entries: I) -> Result<usize, ArchiveError>
where
    I: IntoIterator<Item = Result<PackEntry, ArchiveError>>,
{
    let file = File::create(dest)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let mut count = 0;

    for entry in entries {
        let entry = entry?;
        let mut source = File::open(&entry.source).map_err(|err| ArchiveError::Source {
            path: entry.source.clone(),
            source: err,
        })?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(entry.mode)
            .large_file(entry.size >= LARGE_FILE_THRESHOLD);
        writer.start_file(entry.name.as_str(), options)?;
        io::copy(&mut source, &mut writer)?;
        count += 1;
    }

    let mut inner = writer.finish()?;
    inner.flush()?;

    debug!("Packed {count} entries into {}", dest.display());
    Ok(count)
}

/// Build a deflate-compressed archive at `dest` from directory trees and
/// individual files.
///
/// See [`collect_entries`] for how entries are named.
///
/// # Errors
///
/// Fails on the first unreadable input or write error.
pub fn pack(files: &[PathBuf], dirs: &[PathBuf], dest: &Path) -> Result<usize, ArchiveError> {
    write_entries(dest, collect_entries(files, dirs))
}
