//! Conventional layout of a packaged cell image.
//!
//! ```text
//! <name>.zip
//! ├── src/                 # language source artifacts
//! └── artifacts/
//!     ├── bal/             # runtime modules, promoted by materialize
//!     └── cellery/         # cluster manifests
//! ```

/// File extension of a packaged image, including the dot.
pub const ARCHIVE_EXT: &str = ".zip";

/// Top-level folder holding language source artifacts.
pub const SOURCE_DIR: &str = "src";

/// Top-level folder holding build outputs.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Folder under [`ARTIFACTS_DIR`] holding runtime modules.
pub const RUNTIME_MODULES_DIR: &str = "bal";

/// Folder under [`ARTIFACTS_DIR`] holding cluster manifests.
pub const CLUSTER_MANIFESTS_DIR: &str = "cellery";

/// Archive file name for an image called `name`.
///
/// ```
/// assert_eq!(cell_schema::layout::archive_file_name("hello"), "hello.zip");
/// ```
pub fn archive_file_name(name: &str) -> String {
    format!("{name}{ARCHIVE_EXT}")
}

/// Relative path (with `/` separators) of the runtime module subtree.
pub fn runtime_modules_path() -> String {
    format!("{ARTIFACTS_DIR}/{RUNTIME_MODULES_DIR}")
}
