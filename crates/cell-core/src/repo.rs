//! Local image repository.
//!
//! Archives are addressed by `(registry, organization, name, version)`:
//!
//! ```text
//! <home>/repos/<registry>/<org>/<name>/<version>/<name>.zip
//! ```
//!
//! Reading an image out of the repository always goes through a staging
//! directory under `<home>/tmp`, which is removed on every exit path.
//!
//! No operation here takes a lock. Two calls that write the same key (or the
//! same materialization target) at the same time can interleave a removal
//! with a copy; callers must serialize them per [`ImageRef`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cell_schema::ImageRef;
use cell_schema::layout::{ARTIFACTS_DIR, archive_file_name, runtime_modules_path};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::fs::{CopyError, CopyReport, copy_dir};
use crate::io::{ArchiveError, ManifestEntry, list_entries, pack, unpack};
use crate::paths::{CellHome, runtime_target_dir};

#[derive(Error, Debug)]
pub enum RepoError {
    /// The image has not been pulled or built into this repository.
    #[error("cell image {image} not found in local repository ({}); pull or build it first", .path.display())]
    NotFound { image: ImageRef, path: PathBuf },

    /// The archive exists but lacks the folder an operation needs.
    #[error("cell image {image} does not contain '{subtree}'")]
    MissingSubtree { image: ImageRef, subtree: String },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RepoError {
    /// `true` when extraction was aborted because an entry escaped its root.
    pub fn is_path_traversal(&self) -> bool {
        matches!(self, Self::Archive(err) if err.is_path_traversal())
    }
}

/// Result of a successful [`LocalRepo::materialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// Directory the image's runtime modules were installed into.
    pub target: PathBuf,
    /// Every file written below `target`.
    pub files: Vec<PathBuf>,
}

/// Handle on the image repository below a [`CellHome`].
#[derive(Debug, Clone)]
pub struct LocalRepo {
    home: CellHome,
}

impl LocalRepo {
    pub fn new(home: CellHome) -> Self {
        Self { home }
    }

    pub fn home(&self) -> &CellHome {
        &self.home
    }

    /// Where the archive for `image` lives (whether or not it exists).
    pub fn archive_path(&self, image: &ImageRef) -> PathBuf {
        self.home.archive_path(image)
    }

    /// Whether `image` has been pulled or built.
    pub fn contains(&self, image: &ImageRef) -> bool {
        self.archive_path(image).is_file()
    }

    fn require_archive(&self, image: &ImageRef) -> Result<PathBuf, RepoError> {
        let path = self.archive_path(image);
        if path.is_file() {
            Ok(path)
        } else {
            Err(RepoError::NotFound {
                image: image.clone(),
                path,
            })
        }
    }

    /// Pack `dirs` and `files` straight into the repository entry for `image`.
    ///
    /// The archive is built next to its final location and renamed into
    /// place, so a failed pack leaves any previous archive untouched.
    ///
    /// # Errors
    ///
    /// Propagates the first pack error, or an IO error creating the entry.
    pub fn store(
        &self,
        image: &ImageRef,
        files: &[PathBuf],
        dirs: &[PathBuf],
    ) -> Result<PathBuf, RepoError> {
        let dest = self.archive_path(image);
        let partial = self.prepare_entry(image, &dest)?;

        let count = match pack(files, dirs, &partial) {
            Ok(count) => count,
            Err(err) => {
                let _ = fs::remove_file(&partial);
                return Err(err.into());
            }
        };
        fs::rename(&partial, &dest)?;

        info!("Stored {image} ({count} entries) at {}", dest.display());
        Ok(dest)
    }

    /// Copy an already-fetched archive into the repository entry for `image`.
    ///
    /// # Errors
    ///
    /// Fails if `archive` is not a readable archive or cannot be copied.
    pub fn import(&self, image: &ImageRef, archive: &Path) -> Result<PathBuf, RepoError> {
        let entries = list_entries(archive)?;
        let dest = self.archive_path(image);
        let partial = self.prepare_entry(image, &dest)?;

        if let Err(err) = fs::copy(archive, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(err.into());
        }
        fs::rename(&partial, &dest)?;

        info!("Imported {image} ({} entries) from {}", entries.len(), archive.display());
        Ok(dest)
    }

    fn prepare_entry(&self, image: &ImageRef, dest: &Path) -> Result<PathBuf, RepoError> {
        fs::create_dir_all(self.home.image_dir(image))?;
        let mut partial = dest.as_os_str().to_owned();
        partial.push(".partial");
        Ok(PathBuf::from(partial))
    }

    /// Entries of the archive for `image`, in manifest order.
    ///
    /// # Errors
    ///
    /// [`RepoError::NotFound`] if the image is not in the repository.
    pub fn list_files(&self, image: &ImageRef) -> Result<Vec<ManifestEntry>, RepoError> {
        let archive = self.require_archive(image)?;
        Ok(list_entries(&archive)?)
    }

    /// Install the runtime modules of `image` into `runtime_module_path`.
    ///
    /// The archive is extracted into a fresh staging directory, the target
    /// `<runtime_module_path>/<org>/<name>/<version>` is removed if present,
    /// and the `artifacts/bal` folder is copied into it. The staging
    /// directory is removed before this returns, on success and on failure.
    ///
    /// Running it again with the same archive produces the same tree: stale
    /// files from an earlier materialization never survive.
    ///
    /// # Errors
    ///
    /// - [`RepoError::NotFound`] if the image has not been pulled or built.
    /// - [`RepoError::Archive`] if extraction fails, including path traversal
    ///   (see [`RepoError::is_path_traversal`]). The target is untouched.
    /// - [`RepoError::MissingSubtree`] if the archive has no runtime modules.
    ///   The target is untouched.
    /// - [`RepoError::Copy`] or [`RepoError::Io`] if replacing the target
    ///   fails. The target may then be partially populated; run this again
    ///   to repair it.
    pub fn materialize(
        &self,
        image: &ImageRef,
        runtime_module_path: &Path,
    ) -> Result<Materialized, RepoError> {
        let target = runtime_target_dir(runtime_module_path, image);
        let report = self.promote(image, &runtime_modules_path(), &target, true)?;

        info!("Materialized {image} into {}", target.display());
        Ok(Materialized {
            target,
            files: report.copied,
        })
    }

    /// Copy the `artifacts` folder of `image` into `output_dir`.
    ///
    /// Unlike [`materialize`](Self::materialize), existing content in
    /// `output_dir` is kept and overwritten file by file.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`materialize`](Self::materialize).
    pub fn extract_resources(
        &self,
        image: &ImageRef,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, RepoError> {
        let report = self.promote(image, ARTIFACTS_DIR, output_dir, false)?;
        Ok(report.copied)
    }

    /// Stage the archive, then copy `subtree` of it into `target`.
    ///
    /// The staging directory is removed whatever the outcome; failing to
    /// remove it is logged, not returned.
    fn promote(
        &self,
        image: &ImageRef,
        subtree: &str,
        target: &Path,
        replace: bool,
    ) -> Result<CopyReport, RepoError> {
        let archive = self.require_archive(image)?;
        let staging = self.staging_dir()?;
        let staging_path = staging.path().to_path_buf();
        debug!("Staging {image} in {}", staging_path.display());

        let result = promote_staged(image, &archive, &staging_path, subtree, target, replace);

        if let Err(err) = staging.close() {
            warn!(
                "Failed to remove staging directory {}: {err}",
                staging_path.display()
            );
        }
        Ok(result?.into_result()?)
    }

    fn staging_dir(&self) -> Result<TempDir, RepoError> {
        let tmp = self.home.tmp_dir();
        fs::create_dir_all(&tmp)?;
        Ok(tempfile::Builder::new().prefix("stage-").tempdir_in(&tmp)?)
    }

    /// Every image in the repository, sorted.
    ///
    /// Directories that do not form a valid reference, or that lack the
    /// expected archive file, are ignored.
    ///
    /// A missing repository is empty. Subdirectories that cannot be read
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Fails if the repository root exists but cannot be read as a
    /// directory.
    pub fn images(&self) -> Result<Vec<ImageRef>, RepoError> {
        let repos = self.home.repos_dir();
        if !repos.exists() {
            return Ok(Vec::new());
        }
        fs::read_dir(&repos)?;

        let mut images: Vec<ImageRef> = WalkDir::new(&repos)
            .min_depth(5)
            .max_depth(5)
            .into_iter()
            .filter_map(|next| match next {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!("Skipping unreadable repository path: {err}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&repos).ok()?;
                let parts: Vec<&str> = relative
                    .components()
                    .map(|c| c.as_os_str().to_str())
                    .collect::<Option<_>>()?;
                let [registry, organization, name, version, file] = parts.as_slice() else {
                    return None;
                };
                if *file != archive_file_name(name) {
                    return None;
                }
                ImageRef::new(registry, organization, name, version).ok()
            })
            .collect();

        images.sort();
        images.dedup();
        Ok(images)
    }

    /// Delete the repository entry for `image`, pruning parent directories
    /// that become empty.
    ///
    /// Returns `false` if there was nothing to delete.
    ///
    /// # Errors
    ///
    /// Fails if the entry exists but cannot be removed.
    pub fn remove(&self, image: &ImageRef) -> Result<bool, RepoError> {
        let dir = self.home.image_dir(image);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)?;

        let repos = self.home.repos_dir();
        for ancestor in dir.ancestors().skip(1) {
            if ancestor == repos || !ancestor.starts_with(&repos) {
                break;
            }
            // Stops at the first directory that still has other images.
            if fs::remove_dir(ancestor).is_err() {
                break;
            }
        }

        info!("Removed {image} from local repository");
        Ok(true)
    }
}

fn promote_staged(
    image: &ImageRef,
    archive: &Path,
    staging: &Path,
    subtree: &str,
    target: &Path,
    replace: bool,
) -> Result<CopyReport, RepoError> {
    unpack(archive, staging)?;

    let source = staging.join(subtree);
    if !source.is_dir() {
        return Err(RepoError::MissingSubtree {
            image: image.clone(),
            subtree: subtree.to_string(),
        });
    }

    if replace {
        remove_existing(target)?;
    }
    Ok(copy_dir(&source, target)?)
}

fn remove_existing(target: &Path) -> io::Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {
            debug!("Removing previous materialization at {}", target.display());
            fs::remove_dir_all(target)
        }
        Ok(_) => fs::remove_file(target),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn image(s: &str) -> ImageRef {
        ImageRef::parse(s).unwrap()
    }

    fn build_cell(root: &Path) -> PathBuf {
        let cell = root.join("build");
        fs::create_dir_all(cell.join("artifacts/bal/orders")).unwrap();
        fs::create_dir_all(cell.join("artifacts/cellery")).unwrap();
        fs::create_dir_all(cell.join("src")).unwrap();
        fs::write(cell.join("artifacts/bal/orders/orders.bal"), "module").unwrap();
        fs::write(cell.join("artifacts/cellery/orders.yaml"), "kind: Cell").unwrap();
        fs::write(cell.join("src/orders.bal"), "source").unwrap();
        cell
    }

    /// Pack the contents of `cell` (not the folder itself) into the repo.
    fn store_contents(repo: &LocalRepo, img: &ImageRef, cell: &Path) -> PathBuf {
        let dirs = vec![cell.join("artifacts"), cell.join("src")];
        repo.store(img, &[], &dirs).unwrap()
    }

    #[test]
    fn test_store_places_archive_at_key() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let img = image("acme/orders:1.0.0");
        let cell = build_cell(dir.path());

        let path = store_contents(&repo, &img, &cell);

        assert_eq!(
            path,
            dir.path()
                .join("home/repos/registry-1.docker.io/acme/orders/1.0.0/orders.zip")
        );
        assert!(repo.contains(&img));
        assert!(!path.with_extension("zip.partial").exists());

        let names: Vec<String> = repo.list_files(&img).unwrap().into_iter().map(|e| e.path).collect();
        assert!(names.contains(&"artifacts/bal/orders/orders.bal".to_string()));
        assert!(names.contains(&"src/orders.bal".to_string()));
    }

    #[test]
    fn test_store_failure_keeps_previous_archive() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let img = image("acme/orders:1.0.0");
        let cell = build_cell(dir.path());
        let path = store_contents(&repo, &img, &cell);
        let before = fs::read(&path).unwrap();

        let err = repo
            .store(&img, &[dir.path().join("missing.bal")], &[])
            .unwrap_err();
        assert!(matches!(err, RepoError::Archive(ArchiveError::Source { .. })));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_materialize_not_found() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let err = repo
            .materialize(&image("acme/ghost:1.0.0"), &dir.path().join("runtime"))
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound { .. }));
        assert!(!dir.path().join("runtime").exists());
    }

    #[test]
    fn test_materialize_copies_runtime_modules() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let img = image("acme/orders:1.0.0");
        store_contents(&repo, &img, &build_cell(dir.path()));

        let runtime = dir.path().join("runtime");
        let done = repo.materialize(&img, &runtime).unwrap();

        assert_eq!(done.target, runtime.join("acme/orders/1.0.0"));
        assert_eq!(done.files, vec![done.target.join("orders/orders.bal")]);
        assert_eq!(
            fs::read_to_string(done.target.join("orders/orders.bal")).unwrap(),
            "module"
        );
        // Only runtime modules are promoted.
        assert!(!done.target.join("orders.yaml").exists());
    }

    #[test]
    fn test_materialize_replaces_stale_files() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let img = image("acme/orders:1.0.0");
        store_contents(&repo, &img, &build_cell(dir.path()));

        let runtime = dir.path().join("runtime");
        let target = runtime.join("acme/orders/1.0.0");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.bal"), "old").unwrap();

        repo.materialize(&img, &runtime).unwrap();
        assert!(!target.join("stale.bal").exists());
        assert!(target.join("orders/orders.bal").exists());
    }

    #[test]
    fn test_materialize_cleans_staging() {
        let dir = tempdir().unwrap();
        let home = CellHome::new(dir.path().join("home"));
        let repo = LocalRepo::new(home.clone());
        let img = image("acme/orders:1.0.0");
        store_contents(&repo, &img, &build_cell(dir.path()));

        repo.materialize(&img, &dir.path().join("runtime")).unwrap();
        assert_eq!(fs::read_dir(home.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_materialize_missing_subtree_leaves_target() {
        let dir = tempdir().unwrap();
        let home = CellHome::new(dir.path().join("home"));
        let repo = LocalRepo::new(home.clone());
        let img = image("acme/docs:1.0.0");
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("readme.md"), "docs").unwrap();
        repo.store(&img, &[], &[src]).unwrap();

        let runtime = dir.path().join("runtime");
        let target = runtime.join("acme/docs/1.0.0");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("keep.bal"), "keep").unwrap();

        let err = repo.materialize(&img, &runtime).unwrap_err();
        assert!(matches!(err, RepoError::MissingSubtree { .. }));
        assert!(target.join("keep.bal").exists());
        assert_eq!(fs::read_dir(home.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_extract_resources_merges_into_output() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let img = image("acme/orders:1.0.0");
        store_contents(&repo, &img, &build_cell(dir.path()));

        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("existing.txt"), "mine").unwrap();

        let files = repo.extract_resources(&img, &out).unwrap();
        assert_eq!(files.len(), 2);
        assert!(out.join("cellery/orders.yaml").exists());
        assert!(out.join("bal/orders/orders.bal").exists());
        assert!(out.join("existing.txt").exists());
    }

    #[test]
    fn test_import_and_images() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let cell = build_cell(dir.path());

        let external = dir.path().join("download.zip");
        crate::io::pack(&[], &[cell.join("artifacts")], &external).unwrap();

        let b = image("reg.example.com/acme/billing:2.0.0");
        let a = image("acme/orders:1.0.0");
        repo.import(&b, &external).unwrap();
        repo.import(&a, &external).unwrap();

        // Noise that must not show up as an image.
        let stray = dir.path().join("home/repos/reg.example.com/acme/billing/2.0.0/notes.txt");
        fs::write(stray, "x").unwrap();

        assert_eq!(repo.images().unwrap(), vec![b.clone(), a.clone()]);
    }

    #[test]
    fn test_import_rejects_non_archive() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        let bogus = dir.path().join("bogus.zip");
        fs::write(&bogus, "nope").unwrap();

        let img = image("acme/orders:1.0.0");
        assert!(repo.import(&img, &bogus).is_err());
        assert!(!repo.contains(&img));
    }

    #[test]
    fn test_images_empty_repository() {
        let dir = tempdir().unwrap();
        let repo = LocalRepo::new(CellHome::new(dir.path().join("home")));
        assert!(repo.images().unwrap().is_empty());
    }

    #[test]
    fn test_images_unreadable_root() {
        let dir = tempdir().unwrap();
        let home = CellHome::new(dir.path().join("home"));
        fs::create_dir_all(home.root()).unwrap();
        fs::write(home.repos_dir(), "not a directory").unwrap();

        let repo = LocalRepo::new(home);
        assert!(matches!(repo.images(), Err(RepoError::Io(_))));
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let dir = tempdir().unwrap();
        let home = CellHome::new(dir.path().join("home"));
        let repo = LocalRepo::new(home.clone());
        let cell = build_cell(dir.path());
        let v1 = image("acme/orders:1.0.0");
        let v2 = image("acme/orders:2.0.0");
        store_contents(&repo, &v1, &cell);
        store_contents(&repo, &v2, &cell);

        assert!(repo.remove(&v1).unwrap());
        assert!(!repo.contains(&v1));
        assert!(repo.contains(&v2));

        assert!(repo.remove(&v2).unwrap());
        assert!(!home.repos_dir().join("registry-1.docker.io").exists());
        assert!(home.repos_dir().exists());

        assert!(!repo.remove(&v2).unwrap());
    }
}
