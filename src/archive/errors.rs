use std::io;
use std::path::PathBuf;

/// Alias for `Result<T, ArchiveError>`.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Possible errors surfaced by an [`Archive`](crate::archive::Archive).
///
/// These are library-level I/O failures, not package non-conformance —
/// a malformed or non-conformant package still produces a [`Report`](crate::report::Report);
/// an `ArchiveError` means the archive itself could not be opened or read at all.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    /// The archive itself is unreadable: missing file, not a ZIP, or corrupt
    /// central directory.
    #[error("[UnreadableArchive - `{path:?}`]: {source}")]
    UnreadableArchive {
        /// The root cause of this error.
        source: io::Error,
        /// The path responsible for triggering the error, if applicable.
        path: Option<PathBuf>,
    },

    /// A named entry does not exist within the archive.
    #[error("[EntryNotFound - `{name}`]")]
    EntryNotFound {
        /// The entry name that was looked up.
        name: String,
    },

    /// An entry exists but its bytes could not be decompressed/read.
    #[error("[CannotRead - `{name}`]: {source}")]
    CannotRead {
        /// The root cause of the error.
        source: io::Error,
        /// The entry responsible for triggering the error.
        name: String,
    },
}
