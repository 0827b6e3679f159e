use std::path::{Path, PathBuf};

use cell_schema::ImageRef;
use cell_schema::layout::archive_file_name;
use dirs::home_dir;

/// Environment variable overriding the repository root.
pub const CELL_HOME_ENV: &str = "CELL_HOME";

/// Environment variable pointing at the external runtime installation.
pub const RUNTIME_HOME_ENV: &str = "CELL_RUNTIME_HOME";

/// Root of the local state tree (`~/.cellery` by default).
///
/// Every cache operation receives one of these explicitly; nothing in the
/// crate reaches for a global path on its own.
///
/// ```text
/// ~/.cellery/
/// ├── repos/<registry>/<org>/<name>/<version>/<name>.zip
/// └── tmp/<token>/     # staging, removed after use
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellHome {
    root: PathBuf,
}

impl CellHome {
    /// Use `root` as the repository root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from `CELL_HOME`, falling back to `~/.cellery`.
    ///
    /// Returns `None` if neither is available.
    pub fn from_env() -> Option<Self> {
        Self::resolve(std::env::var_os(CELL_HOME_ENV).map(PathBuf::from))
    }

    fn resolve(explicit: Option<PathBuf>) -> Option<Self> {
        if let Some(root) = explicit.filter(|p| !p.as_os_str().is_empty()) {
            return Some(Self::new(root));
        }
        home_dir().map(|h| Self::new(h.join(".cellery")))
    }

    /// The root itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Image repository: `<root>/repos`
    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    /// Scratch space for staging directories: `<root>/tmp`
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Directory of one cache entry: `<root>/repos/<registry>/<org>/<name>/<version>`
    pub fn image_dir(&self, image: &ImageRef) -> PathBuf {
        self.repos_dir()
            .join(image.registry())
            .join(image.organization())
            .join(image.name())
            .join(image.version())
    }

    /// Packaged archive of one cache entry.
    pub fn archive_path(&self, image: &ImageRef) -> PathBuf {
        self.image_dir(image).join(archive_file_name(image.name()))
    }
}

/// Module search path of the external runtime: `$CELL_RUNTIME_HOME/lib/repo`.
///
/// Returns `None` when the variable is unset or empty.
pub fn runtime_module_path_from_env() -> Option<PathBuf> {
    std::env::var_os(RUNTIME_HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(|v| runtime_module_path(Path::new(&v)))
}

/// Module search path below a runtime installation root.
pub fn runtime_module_path(runtime_home: &Path) -> PathBuf {
    runtime_home.join("lib").join("repo")
}

/// Where a materialized image lives inside a runtime module path.
pub fn runtime_target_dir(module_path: &Path, image: &ImageRef) -> PathBuf {
    module_path
        .join(image.organization())
        .join(image.name())
        .join(image.version())
}
