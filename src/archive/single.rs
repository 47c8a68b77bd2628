use crate::archive::entry::{ArchiveEntry, CompressionMethod, RawLocalHeader};
use crate::archive::errors::{ArchiveError, ArchiveResult};
use crate::archive::Archive;

/// A one-entry pseudo-archive used for *single-file mode*: validating a bare
/// OPF document with no surrounding OCF container.
///
/// There is no ZIP layout to speak of, so [`raw_local_header`](Archive::raw_local_header)
/// always reports `None` and the OCF phase is skipped entirely by the engine
/// rather than run against fabricated container data.
pub struct SingleFileArchive {
    name: String,
    bytes: Vec<u8>,
    entries: [ArchiveEntry; 1],
}

impl SingleFileArchive {
    pub fn new(name: String, bytes: Vec<u8>) -> Self {
        let entries = [ArchiveEntry {
            index: 0,
            name: name.clone(),
            uncompressed_size: bytes.len() as u64,
            compression_method: CompressionMethod::Stored,
        }];
        Self {
            name,
            bytes,
            entries,
        }
    }
}

impl Archive for SingleFileArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read(&self, name: &str) -> ArchiveResult<Vec<u8>> {
        if name == self.name {
            Ok(self.bytes.clone())
        } else {
            Err(ArchiveError::EntryNotFound {
                name: name.to_owned(),
            })
        }
    }

    fn raw_local_header(&self, _index: usize) -> Option<RawLocalHeader> {
        None
    }

    fn raw_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
