#![warn(missing_docs)]
//! # inkspector
//! - Repository: <https://github.com/DevinSterling/inkspector>
//! - Documentation: <https://docs.rs/inkspector>
//!
//! A fast, format-agnostic validation engine for EPUB 2 and 3 packages. It
//! ingests a packaged book (or, in single-file mode, a bare OPF document),
//! runs a phased pipeline of orthogonal rules over its OCF container, OPF
//! package document, and navigation document, and produces a structured
//! [`Report`] of conformance violations classified by severity and stable
//! check code (`OCF-*`, `OPF-*`, `RSC-*`, `PKG-*`, `NAV-*`, `MED-*`, `ACC-*`).
//!
//! ```no_run
//! use inkspector::{validate_path, ValidationOptions};
//!
//! let options = ValidationOptions::default().with_strict(true);
//! let report = validate_path("book.epub", &options)?;
//! if !report.is_valid() {
//!     for diagnostic in report.messages() {
//!         eprintln!("{}: {} {}", diagnostic.severity, diagnostic.check_id, diagnostic.message);
//!     }
//! }
//! # Ok::<(), inkspector::EngineError>(())
//! ```
//!
//! This crate validates; it does not read or render a book for an end user
//! (see `rbook` for that), and it does not format diagnostics beyond the
//! plain [`Report`] structure — JSON/text/JUnit formatters and a
//! command-line front-end are external collaborators, not part of this
//! crate's surface.

pub mod archive;
mod engine;
mod model;
mod parser;
mod prescan;
pub mod report;
mod rules;
mod util;

pub use engine::{EngineError, ValidationOptions};
pub use report::Report;

use crate::archive::Archive;
use std::path::Path;

/// Opens `path` (a ZIP-packaged book, or a bare OPF file when
/// [`ValidationOptions::single_file_mode`] is set) and runs the full
/// validation pipeline against it.
pub fn validate_path(path: impl AsRef<Path>, options: &ValidationOptions) -> Result<Report, EngineError> {
    engine::validate_path(path, options)
}

/// Runs the full validation pipeline against an already-open [`Archive`],
/// for callers who already hold the book's bytes in memory.
pub fn validate_archive(archive: impl Archive, options: &ValidationOptions) -> Result<Report, EngineError> {
    engine::validate_archive(archive, options)
}
