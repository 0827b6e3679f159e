//! Filesystem helpers shared by the packager, extractor and repository.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Fatal errors from [`copy_dir`]. Per-entry problems are not fatal; they
/// are collected in the [`CopyReport`] instead.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("cannot read copy source {}: {source}", .path.display())]
    Source { path: PathBuf, source: io::Error },

    #[error("copy source {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot create copy destination {}: {source}", .path.display())]
    Destination { path: PathBuf, source: io::Error },

    /// The tree was copied, but some entries failed.
    #[error("{} entries failed to copy ({copied} copied){}", .failures.len(), first_failure(.failures))]
    Partial {
        copied: usize,
        failures: Vec<CopyFailure>,
    },
}

fn first_failure(failures: &[CopyFailure]) -> String {
    failures
        .first()
        .map(|f| format!(", first: {f}"))
        .unwrap_or_default()
}

/// One entry that could not be copied.
#[derive(Debug)]
pub struct CopyFailure {
    /// Source path of the entry.
    pub path: PathBuf,
    pub error: io::Error,
}

impl fmt::Display for CopyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Outcome of a best-effort [`copy_dir`].
#[derive(Debug, Default)]
pub struct CopyReport {
    /// Destination paths of every file written.
    pub copied: Vec<PathBuf>,
    pub failures: Vec<CopyFailure>,
}

impl CopyReport {
    /// `true` when no entry failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn a report with failures into [`CopyError::Partial`].
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::Partial`] if any entry failed.
    pub fn into_result(self) -> Result<Self, CopyError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(CopyError::Partial {
                copied: self.copied.len(),
                failures: self.failures,
            })
        }
    }

    fn record_failure(&mut self, path: PathBuf, error: io::Error) {
        warn!("Failed to copy {}: {error}", path.display());
        self.failures.push(CopyFailure { path, error });
    }
}

/// Recursively copy the directory `src` into `dst`, preserving permission bits.
///
/// Best-effort: an entry that cannot be copied is recorded in the returned
/// report and the walk carries on with its siblings. A directory that cannot
/// be created is recorded once and its contents are skipped. Symlinks are
/// followed when copying files, so a dangling link counts as a failure.
///
/// Directory permissions are applied after their contents are written, so
/// read-only source directories still copy.
///
/// # Errors
///
/// Only fails outright when `src` cannot be read as a directory or `dst`
/// cannot be created.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<CopyReport, CopyError> {
    let root_meta = fs::metadata(src).map_err(|source| CopyError::Source {
        path: src.to_path_buf(),
        source,
    })?;
    if !root_meta.is_dir() {
        return Err(CopyError::NotADirectory(src.to_path_buf()));
    }
    fs::create_dir_all(dst).map_err(|source| CopyError::Destination {
        path: dst.to_path_buf(),
        source,
    })?;

    let mut report = CopyReport::default();
    let mut dir_permissions = vec![(dst.to_path_buf(), root_meta.permissions())];

    let mut walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(next) = walker.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(src).to_path_buf();
                report.record_failure(path, io::Error::from(err));
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            let created = fs::create_dir_all(&target)
                .and_then(|()| entry.metadata().map_err(io::Error::from));
            match created {
                Ok(meta) => dir_permissions.push((target, meta.permissions())),
                Err(err) => {
                    report.record_failure(entry.path().to_path_buf(), err);
                    walker.skip_current_dir();
                }
            }
            continue;
        }

        // fs::copy carries the permission bits over.
        match fs::copy(entry.path(), &target) {
            Ok(_) => report.copied.push(target),
            Err(err) => report.record_failure(entry.path().to_path_buf(), err),
        }
    }

    for (dir, permissions) in dir_permissions.into_iter().rev() {
        if let Err(err) = fs::set_permissions(&dir, permissions) {
            report.record_failure(dir, err);
        }
    }

    debug!(
        "Copied {} files from {} to {} ({} failures)",
        report.copied.len(),
        src.display(),
        dst.display(),
        report.failures.len()
    );
    Ok(report)
}

/// Files directly inside `dir` whose names end with `suffix`.
///
/// Not recursive. Returns full paths sorted by file name, and an empty list
/// when `dir` cannot be read.
pub fn find_in_directory(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| !t.is_dir()))
        .filter(|e| e.file_name().to_string_lossy().ends_with(suffix))
        .map(|e| e.path())
        .collect();
    found.sort();
    found
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component.
///
/// Does not touch the filesystem, so symlinks are not resolved. `..` at the
/// start of a relative path is kept; `..` directly under the root is dropped.
///
/// ```
/// use std::path::{Path, PathBuf};
/// use cell_core::fs::normalize_path;
///
/// assert_eq!(normalize_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
/// assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
/// ```
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Whether `candidate`, once normalized, lies strictly below `root`.
///
/// A root that normalizes to nothing (`.`, `a/..`) contains no path, and a
/// candidate that climbs higher than the root does (`../x` against `..`) is
/// never inside. Pass absolute paths to compare against the current
/// directory.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    let root = normalize_path(root);
    let candidate = normalize_path(candidate);
    if root.as_os_str().is_empty() || parent_depth(&candidate) != parent_depth(&root) {
        return false;
    }
    candidate != root && candidate.starts_with(&root)
}

/// Number of leading `..` components of a normalized path.
fn parent_depth(path: &Path) -> usize {
    path.components()
        .take_while(|c| matches!(c, Component::ParentDir))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("a/b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize_path(Path::new("./a/./b")), PathBuf::from("a/b"));
        assert_eq!(normalize_path(Path::new("/../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize_path(Path::new("../../x")), PathBuf::from("../../x"));
    }

    #[test]
    fn test_is_within() {
        let root = Path::new("/tmp/dest");
        assert!(is_within(root, Path::new("/tmp/dest/a/b")));
        assert!(is_within(root, Path::new("/tmp/dest/a/../b")));
        assert!(!is_within(root, Path::new("/tmp/dest/../evil")));
        assert!(!is_within(root, Path::new("/tmp/destination")));
        assert!(!is_within(root, Path::new("/tmp/dest")));
        assert!(!is_within(root, &root.join("/etc/passwd")));
    }

    #[test]
    fn test_is_within_relative_root() {
        assert!(is_within(Path::new("out"), Path::new("out/a")));
        assert!(!is_within(Path::new("out"), Path::new("out/../../evil")));
    }

    #[test]
    fn test_is_within_empty_root() {
        for root in [".", "", "a/.."] {
            let root = Path::new(root);
            assert!(!is_within(root, &root.join("../escaped.txt")), "{root:?}");
            assert!(!is_within(root, &root.join("inner.txt")), "{root:?}");
        }
        assert!(!is_within(Path::new(".."), Path::new("../../x")));
        assert!(is_within(Path::new("../out"), Path::new("../out/a")));
    }

    #[test]
    fn test_copy_dir_nested() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();
        fs::write(src.join("a/b/deep.txt"), "deep").unwrap();

        let dst = dir.path().join("dst");
        let report = copy_dir(&src, &dst).unwrap();

        assert!(report.is_complete());
        assert_eq!(report.copied.len(), 2);
        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
        assert_eq!(fs::read_to_string(dst.join("a/b/deep.txt")).unwrap(), "deep");
        assert!(dst.join("empty").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dir_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let script = src.join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let dst = dir.path().join("dst");
        copy_dir(&src, &dst).unwrap();

        let mode = fs::metadata(dst.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dir_continues_past_failure() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("sub/b.txt"), "b").unwrap();
        fs::write(src.join("z.txt"), "z").unwrap();
        std::os::unix::fs::symlink(src.join("missing"), src.join("broken")).unwrap();

        let dst = dir.path().join("dst");
        let report = copy_dir(&src, &dst).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, src.join("broken"));
        assert_eq!(report.copied.len(), 3);
        assert!(dst.join("a.txt").exists());
        assert!(dst.join("sub/b.txt").exists());
        assert!(dst.join("z.txt").exists());

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, CopyError::Partial { copied: 3, .. }));
    }

    #[test]
    fn test_copy_dir_missing_source() {
        let dir = tempdir().unwrap();
        let err = copy_dir(&dir.path().join("nope"), &dir.path().join("dst")).unwrap_err();
        assert!(matches!(err, CopyError::Source { .. }));
    }

    #[test]
    fn test_find_in_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), "").unwrap();
        fs::write(dir.path().join("a.yaml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("dir.yaml")).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c.yaml"), "").unwrap();

        let found = find_in_directory(dir.path(), ".yaml");
        assert_eq!(
            found,
            vec![dir.path().join("a.yaml"), dir.path().join("b.yaml")]
        );
    }

    #[test]
    fn test_find_in_missing_directory() {
        let dir = tempdir().unwrap();
        assert!(find_in_directory(&dir.path().join("missing"), ".yaml").is_empty());
    }
}
