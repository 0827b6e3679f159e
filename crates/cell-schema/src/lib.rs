//! Shared types for cell images.
//!
//! Holds everything that is pure data: image references and the
//! conventional layout of a packaged image. Side effects live in
//! `cell-core`.

pub mod layout;
pub mod reference;

// Re-exports
pub use reference::{DEFAULT_REGISTRY, ImageRef, ReferenceError};
