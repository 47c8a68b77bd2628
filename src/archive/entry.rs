/// The compression method an archive entry was stored with.
///
/// OCF requires the `mimetype` entry to be `Stored`; the rule engine never
/// needs to know about any other method, so anything unrecognized collapses
/// to [`CompressionMethod::Other`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Other(u16),
}

impl From<zip::CompressionMethod> for CompressionMethod {
    fn from(method: zip::CompressionMethod) -> Self {
        match method {
            zip::CompressionMethod::Stored => Self::Stored,
            zip::CompressionMethod::Deflated => Self::Deflated,
            _ => Self::Other(u16::MAX),
        }
    }
}

impl From<u16> for CompressionMethod {
    fn from(raw: u16) -> Self {
        match raw {
            0 => Self::Stored,
            8 => Self::Deflated,
            other => Self::Other(other),
        }
    }
}

/// A single logical entry in an [`Archive`](crate::archive::Archive), in the
/// order it physically appears in the archive.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) uncompressed_size: u64,
    pub(crate) compression_method: CompressionMethod,
}

impl ArchiveEntry {
    /// Position of this entry in the archive's physical ordering.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw entry name, e.g. `"OEBPS/content.opf"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this entry represents a directory (a trailing `/`).
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }
}

/// The fields of a ZIP local-file-header that the library zip API does not
/// surface, obtained by a manual byte-level read of bytes `[0..30)` of the
/// entry's local header plus its file name.
///
/// See `[PKG-005]` — `mimetype`'s local header must carry zero extra-field
/// bytes and be stored rather than deflated.
#[derive(Copy, Clone, Debug)]
pub struct RawLocalHeader {
    pub(crate) extra_field_length: u16,
    pub(crate) compression_method: CompressionMethod,
}

impl RawLocalHeader {
    pub fn extra_field_length(&self) -> u16 {
        self.extra_field_length
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.compression_method
    }
}
