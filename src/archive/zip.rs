use crate::archive::entry::{ArchiveEntry, CompressionMethod, RawLocalHeader};
use crate::archive::errors::{ArchiveError, ArchiveResult};
use crate::archive::Archive;
use crate::util::sync::Lock;
use std::io::{self, Cursor, Read};
use std::path::Path;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4B50;
const LOCAL_HEADER_FIXED_LEN: usize = 30;

/// A ZIP-backed [`Archive`].
///
/// The entire archive is buffered into memory up front. This is what lets
/// [`ArchiveEntry`]-level reads come from the `zip` crate (which only ever
/// sees a central-directory view) while raw local-file-header bytes are
/// read directly off `bytes`, independent of whatever central-directory
/// offsets the `zip` crate version in use happens to expose.
pub struct ZipArchive {
    bytes: Vec<u8>,
    entries: Vec<ArchiveEntry>,
    raw_headers: Vec<Option<RawLocalHeader>>,
    inner: Lock<zip::ZipArchive<Cursor<Vec<u8>>>>,
}

impl ZipArchive {
    pub fn new(bytes: Vec<u8>, path: Option<&Path>) -> ArchiveResult<Self> {
        let cursor = Cursor::new(bytes.clone());
        let mut inner =
            zip::ZipArchive::new(cursor).map_err(|error| ArchiveError::UnreadableArchive {
                source: io::Error::from(error),
                path: path.map(Path::to_path_buf),
            })?;

        let entries = central_directory_entries(&mut inner);
        let raw_headers = walk_local_headers(&bytes, entries.len());

        Ok(Self {
            bytes,
            entries,
            raw_headers,
            inner: Lock::new(inner),
        })
    }

    pub fn open_path(path: &Path) -> ArchiveResult<Self> {
        let bytes = std::fs::read(path).map_err(|error| ArchiveError::UnreadableArchive {
            source: error,
            path: Some(path.to_path_buf()),
        })?;
        Self::new(bytes, Some(path))
    }
}

fn central_directory_entries(inner: &mut zip::ZipArchive<Cursor<Vec<u8>>>) -> Vec<ArchiveEntry> {
    (0..inner.len())
        .filter_map(|index| {
            // `by_index_raw` exposes central-directory metadata without
            // paying for decompression, which we don't need here.
            let file = inner.by_index_raw(index).ok()?;
            Some(ArchiveEntry {
                index,
                name: file.name().to_owned(),
                uncompressed_size: file.size(),
                compression_method: CompressionMethod::from(file.compression()),
            })
        })
        .collect()
}

/// Walks the archive's physical byte layout from offset zero, reading each
/// ZIP local-file-header in turn. Stops (leaving remaining entries `None`)
/// the moment a header cannot be parsed, e.g. a streamed entry using a
/// trailing data descriptor with a zero-valued `compressed_size` in its
/// local header — that layout cannot be walked without first consulting
/// the central directory for the real compressed size.
fn walk_local_headers(bytes: &[u8], entry_count: usize) -> Vec<Option<RawLocalHeader>> {
    let mut headers = Vec::with_capacity(entry_count);
    let mut offset = 0usize;

    while headers.len() < entry_count {
        let Some(header) = bytes.get(offset..offset + LOCAL_HEADER_FIXED_LEN) else {
            break;
        };
        let signature = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if signature != LOCAL_HEADER_SIGNATURE {
            break;
        }
        let compression_method = u16::from_le_bytes(header[8..10].try_into().unwrap());
        let compressed_size = u32::from_le_bytes(header[18..22].try_into().unwrap());
        let name_length = u16::from_le_bytes(header[26..28].try_into().unwrap()) as usize;
        let extra_field_length = u16::from_le_bytes(header[28..30].try_into().unwrap());

        headers.push(Some(RawLocalHeader {
            extra_field_length,
            compression_method: CompressionMethod::from(compression_method),
        }));

        // General-purpose flag bit 3 (streamed, data descriptor follows) means
        // `compressed_size` here is zero and the real length lives after the
        // entry's data; we cannot safely continue the walk in that case.
        let flag = u16::from_le_bytes(header[6..8].try_into().unwrap());
        if flag & 0x0008 != 0 {
            break;
        }

        let data_start = offset + LOCAL_HEADER_FIXED_LEN + name_length + extra_field_length as usize;
        offset = data_start + compressed_size as usize;
    }

    headers.resize(entry_count, None);
    headers
}

impl Archive for ZipArchive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn read(&self, name: &str) -> ArchiveResult<Vec<u8>> {
        let mut guard = self.inner.lock().map_err(|_| ArchiveError::CannotRead {
            source: io::Error::other("poisoned archive lock"),
            name: name.to_owned(),
        })?;
        let mut file = guard
            .by_name(name)
            .map_err(|_| ArchiveError::EntryNotFound {
                name: name.to_owned(),
            })?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|source| ArchiveError::CannotRead {
                source,
                name: name.to_owned(),
            })?;
        Ok(data)
    }

    fn raw_local_header(&self, index: usize) -> Option<RawLocalHeader> {
        self.raw_headers.get(index).copied().flatten()
    }

    fn raw_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
