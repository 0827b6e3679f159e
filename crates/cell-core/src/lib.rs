//! cell-core - packaging and local caching of cell images
//!
//! Cell images are versioned deployable units distributed as zip archives.
//! This crate builds those archives, extracts them safely, and keeps a local
//! repository of them that a downstream runtime consumes.
//!
//! # Architecture
//!
//! - [`io::pack`] / [`io::unpack`]: archive creation and zip-slip-safe
//!   extraction.
//! - [`repo::LocalRepo`]: the on-disk repository, keyed by
//!   [`ImageRef`], with staged materialization into a runtime module path.
//! - [`fs`], [`duration`]: leaf helpers.
//!
//! Everything is synchronous and single-threaded. The repository root is an
//! explicit [`CellHome`] value; nothing reads a global path implicitly.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.cellery/
//! ├── repos/      # <registry>/<org>/<name>/<version>/<name>.zip
//! └── tmp/        # Staging directories, removed after use
//! ```

pub mod duration;
pub mod fs;
pub mod io;
pub mod paths;
pub mod repo;

pub use cell_schema::{ImageRef, ReferenceError};
pub use paths::CellHome;
pub use repo::{LocalRepo, Materialized, RepoError};
