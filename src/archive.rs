//! Archive access: ordered entries, byte content, and raw ZIP local-header
//! inspection.
//!
//! Grounded on the teacher's [`Archive`](https://docs.rs/rbook) trait and its
//! `Lock<T>`-wrapped [`zip::ZipArchive`] implementation, generalized from a
//! resource-retrieval interface into the read-only, whole-archive view the
//! validation engine needs (ordered entries instead of single-resource
//! lookup, plus raw local-header access that the teacher never required).

pub(crate) mod entry;
pub mod errors;
pub(crate) mod single;
pub(crate) mod zip;

pub use entry::{ArchiveEntry, CompressionMethod, RawLocalHeader};
pub use zip::ZipArchive;

use crate::archive::errors::ArchiveResult;
use crate::util::sync::SendAndSync;
use std::path::Path;

/// A read-only, ordered view over a packaged book's entries.
///
/// An `Archive` is built once per validation call and is never mutated
/// afterward; every phase of the rule engine receives only a shared
/// reference. `threadsafe`-feature callers may therefore validate many
/// archives concurrently from separate threads.
pub trait Archive: SendAndSync {
    /// All entries, in the archive's physical (on-disk) order.
    fn entries(&self) -> &[ArchiveEntry];

    /// Look up an entry by its exact name.
    fn lookup(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries().iter().find(|entry| entry.name() == name)
    }

    /// Read and fully decompress an entry's bytes.
    fn read(&self, name: &str) -> ArchiveResult<Vec<u8>>;

    /// The raw ZIP local-file-header fields for the entry at `index`, if the
    /// archive's physical layout could be walked that far (see
    /// [`ZipArchive`]'s local-header walk). Always `None` for a
    /// [`single::SingleFileArchive`].
    fn raw_local_header(&self, index: usize) -> Option<RawLocalHeader>;

    /// The complete raw bytes of the archive, for callers (the OCF phase's
    /// ZIP-layout rules) that need access beyond any single entry.
    fn raw_bytes(&self) -> &[u8];
}

/// Opens `path` as a [`ZipArchive`].
pub fn open_zip(path: impl AsRef<Path>) -> ArchiveResult<ZipArchive> {
    ZipArchive::open_path(path.as_ref())
}
