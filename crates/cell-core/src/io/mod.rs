//! IO modules - archive packaging and extraction

pub mod archive;
pub mod extract;
pub mod pack;

pub use archive::{ArchiveError, ManifestEntry, list_entries};
pub use extract::{ExtractedFile, unpack};
pub use pack::{PackEntry, collect_entries, pack, write_entries};
