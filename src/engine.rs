//! The phase controller (§4.10 "Phase controller") and the public
//! validation entry points (§6).
//!
//! Grounded on the teacher's top-level `Epub`/`Ebook` construction path
//! (`ebook::epub::parser`), which likewise walks a fixed sequence of
//! sub-parsers and surfaces one top-level error type; this engine
//! generalizes that to a phase sequence that can short-circuit on a fatal
//! flag rather than always running to completion.

use crate::archive::errors::ArchiveError;
use crate::archive::single::SingleFileArchive;
use crate::archive::{Archive, ZipArchive};
use crate::model::container::ContainerModel;
use crate::model::nav::NavModel;
use crate::parser::package as package_parser;
use crate::prescan::{self, PrescanOutcome};
use crate::report::Report;
use crate::rules;
use std::path::Path;

/// Validation entry-point configuration (§6 "Input").
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationOptions {
    strict: bool,
    single_file_mode: bool,
}

impl ValidationOptions {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_single_file_mode(mut self, single_file_mode: bool) -> Self {
        self.single_file_mode = single_file_mode;
        self
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn single_file_mode(&self) -> bool {
        self.single_file_mode
    }
}

/// The library's error type: failures of the validator itself, never a
/// statement about the subject file's conformance (§7 "Error type
/// layering").
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Opens `path` (a ZIP package, or a bare OPF in single-file mode) and runs
/// the full pipeline.
pub fn validate_path(path: impl AsRef<Path>, options: &ValidationOptions) -> Result<Report, EngineError> {
    let path = path.as_ref();
    if options.single_file_mode() {
        if path.is_dir() {
            return Err(EngineError::InvalidInput(format!("`{}` is a directory, not an OPF file", path.display())));
        }
        let bytes = std::fs::read(path)?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("content.opf").to_owned();
        let archive = SingleFileArchive::new(name, bytes);
        return validate_archive(archive, options);
    }

    let archive = ZipArchive::open_path(path)?;
    validate_archive(archive, options)
}

/// Runs the full pipeline against an already-open archive.
pub fn validate_archive(archive: impl Archive, options: &ValidationOptions) -> Result<Report, EngineError> {
    let mut report = Report::new();
    run_pipeline(&archive, options, &mut report);
    Ok(report)
}

fn run_pipeline(archive: &dyn Archive, options: &ValidationOptions, report: &mut Report) {
    let container = if options.single_file_mode() {
        None
    } else {
        match load_container(archive, report) {
            ContainerOutcome::Fatal => {
                // Container loading is one rule among the OCF phase's many
                // (§2, §4.6); its failure must not skip the rest of the
                // phase's independent, order-insensitive rules.
                rules::ocf::run(archive, None, report);
                return;
            }
            ContainerOutcome::Loaded(model) => Some(model),
        }
    };

    let ocf_fatal = rules::ocf::run(archive, container.as_ref(), report);
    if ocf_fatal {
        return;
    }

    let Some(opf_location) = resolve_opf_location(archive, container.as_ref(), options) else {
        return;
    };

    let Ok(opf_bytes) = archive.read(&opf_location) else {
        report.fatal("OPF-002", format!("primary rootfile `{opf_location}` could not be read"));
        return;
    };

    let prescan_result = prescan::run(&opf_bytes);
    match prescan_result.outcome {
        Some(PrescanOutcome::Accepted) => {}
        Some(PrescanOutcome::RejectedConflict) => {
            report.warning("RSC-027", "OPF declared encoding conflicts with its byte-level encoding");
            report.fatal("RSC-016", "OPF encoding/namespace pre-scan rejected the document");
            return;
        }
        Some(_) => {
            report.fatal("RSC-016", "OPF byte-level encoding is not supported");
            return;
        }
        None => {}
    }
    if prescan_result.utf16_warning {
        report.warning("RSC-027", "OPF is UTF-16 encoded");
    }
    if let Some(public_id) = &prescan_result.doctype_public_id
        && !prescan::is_allowed_doctype_public_id(public_id)
    {
        report.warning("RSC-005", format!("DOCTYPE public identifier `{public_id}` is not recognized"));
    }

    let package = match package_parser::parse(&opf_bytes, opf_location.clone(), options.strict()) {
        Ok(mut model) => {
            let _ = package_parser::collect_metadata_links(&mut model, &opf_bytes, options.strict());
            model
        }
        Err(_) => {
            report.fatal("RSC-016", "OPF document is not well-formed XML");
            return;
        }
    };

    if package.is_legacy_oeb1 && package.version.is_missing() {
        report.error("RSC-005", "legacy OEBPS 1.2 package has no `version` attribute");
    }

    let opf_fatal = rules::opf::run(&package, report);
    if opf_fatal {
        return;
    }

    let archive_membership_applies = !options.single_file_mode();
    rules::xref::run(archive, &package, archive_membership_applies, report);

    if let Some(nav_item) = package.manifest.iter().find(|item| item.has_property("nav")) {
        if let Some(nav_href) = &nav_item.href
            && let Ok(nav_bytes) = archive.read(nav_href)
        {
            match NavModel::parse(&nav_bytes, options.strict()) {
                Ok(nav_model) => rules::nav::run(archive, &package, &nav_model, nav_href, report),
                Err(_) => report.fatal("NAV-011", "navigation document is not well-formed XML"),
            }
        }
    }
}

enum ContainerOutcome {
    Loaded(ContainerModel),
    Fatal,
}

fn load_container(archive: &dyn Archive, report: &mut Report) -> ContainerOutcome {
    let Ok(bytes) = archive.read("META-INF/container.xml") else {
        report.fatal("RSC-002", "archive has no `META-INF/container.xml`");
        return ContainerOutcome::Fatal;
    };
    match ContainerModel::parse(&bytes) {
        Ok(model) => ContainerOutcome::Loaded(model),
        Err(_) => {
            report.fatal("RSC-005", "`META-INF/container.xml` is not well-formed XML");
            ContainerOutcome::Fatal
        }
    }
}

fn resolve_opf_location(archive: &dyn Archive, container: Option<&ContainerModel>, options: &ValidationOptions) -> Option<String> {
    if options.single_file_mode() {
        return archive.entries().first().map(|entry| entry.name().to_owned());
    }
    container?.primary()?.full_path.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn minimal_epub() -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        let mut writer = ZipWriter::new(&mut buffer);
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        writer.start_file("mimetype", stored).unwrap();
        writer.write_all(b"application/epub+zip").unwrap();

        writer.start_file("META-INF/container.xml", SimpleFileOptions::default()).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
                <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
                </container>"#,
            )
            .unwrap();

        writer.start_file("OEBPS/content.opf", SimpleFileOptions::default()).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>T</dc:title>
    <dc:identifier id="bookid">urn:isbn:000</dc:identifier>
    <dc:language>en</dc:language>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
  </metadata>
  <manifest>
    <item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
  </spine>
</package>"#,
            )
            .unwrap();

        writer.start_file("OEBPS/c1.xhtml", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"<html xmlns=\"http://www.w3.org/1999/xhtml\"><body>Hi</body></html>").unwrap();

        writer.start_file("OEBPS/nav.xhtml", SimpleFileOptions::default()).unwrap();
        writer
            .write_all(
                br#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body><nav epub:type="toc"><ol><li><a href="c1.xhtml">Chapter 1</a></li></ol></nav></body></html>"#,
            )
            .unwrap();

        writer.finish().unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_valid_minimal_epub3_has_no_errors() {
        let bytes = minimal_epub();
        let archive = ZipArchive::new(bytes, None).unwrap();
        let report = validate_archive(archive, &ValidationOptions::default()).unwrap();
        assert!(report.is_valid(), "report had diagnostics: {:?}", report.messages());
    }

    /// Encodes an ASCII string as UTF-16BE bytes prefixed with a BOM, for
    /// §4.3's BOM/declaration-conflict scenario (spec §8 scenario 4).
    fn utf16be_with_bom(ascii: &str) -> Vec<u8> {
        let mut bytes = vec![0xFE, 0xFF];
        for byte in ascii.bytes() {
            bytes.push(0x00);
            bytes.push(byte);
        }
        bytes
    }

    #[test]
    fn test_utf16_opf_declaring_utf8_is_fatal_encoding_conflict() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buffer);
            let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            writer.start_file("mimetype", stored).unwrap();
            writer.write_all(b"application/epub+zip").unwrap();

            writer.start_file("META-INF/container.xml", SimpleFileOptions::default()).unwrap();
            writer
                .write_all(
                    br#"<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
                    <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
                    </container>"#,
                )
                .unwrap();

            writer.start_file("OEBPS/content.opf", SimpleFileOptions::default()).unwrap();
            let opf = utf16be_with_bom(r#"<?xml version="1.0" encoding="utf-8"?><package xmlns="http://www.idpf.org/2007/opf" version="3.0"/>"#);
            writer.write_all(&opf).unwrap();
            writer.finish().unwrap();
        }
        let archive = ZipArchive::new(buffer.into_inner(), None).unwrap();
        let report = validate_archive(archive, &ValidationOptions::default()).unwrap();

        assert_eq!(1, report.count_by_code("RSC-027"));
        assert_eq!(1, report.count_by_code("RSC-016"));
        assert!(!report.is_valid());
        // The Package phase never ran, so no OPF-series diagnostics follow
        // the conflict (§7 "Suppression policy").
        assert!(report.messages().iter().all(|d| !d.check_id.starts_with("OPF-")));
    }

    #[test]
    fn test_missing_mimetype_invalidates_report() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buffer);
            writer.start_file("META-INF/container.xml", SimpleFileOptions::default()).unwrap();
            writer
                .write_all(
                    br#"<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
                    <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
                    </container>"#,
                )
                .unwrap();
            writer.start_file("OEBPS/content.opf", SimpleFileOptions::default()).unwrap();
            writer.write_all(br#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0"/>"#).unwrap();
            writer.finish().unwrap();
        }
        let archive = ZipArchive::new(buffer.into_inner(), None).unwrap();
        let report = validate_archive(archive, &ValidationOptions::default()).unwrap();
        assert_eq!(1, report.count_by_code("PKG-006"));
        assert_eq!(0, report.count_by_code("PKG-007"));
        assert!(!report.is_valid());
    }

    /// §2: "Within a phase, rules are independent and order-insensitive".
    /// A missing `META-INF/container.xml` is fatal to container loading, but
    /// the rest of the OCF phase's rules (mimetype, in this case) must still
    /// run rather than being skipped alongside it.
    #[test]
    fn test_ocf_rules_still_run_when_container_xml_is_missing() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buffer);
            let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            writer.start_file("mimetype", stored).unwrap();
            writer.write_all(b"not the right contents").unwrap();
            writer.finish().unwrap();
        }
        let archive = ZipArchive::new(buffer.into_inner(), None).unwrap();
        let report = validate_archive(archive, &ValidationOptions::default()).unwrap();

        assert_eq!(1, report.count_by_code("RSC-002"));
        assert_eq!(1, report.count_by_code("PKG-007"));
        assert!(!report.is_valid());
    }
}
