//! OCF Phase rules (§4.6): mimetype, container well-formedness, rootfile
//! resolution, filename lexicon, duplicate names under Unicode folding.

use crate::archive::{Archive, CompressionMethod};
use crate::model::container::ContainerModel;
use crate::parser::xml::{XmlEvent, XmlReader};
use crate::report::Report;
use crate::util::unicode::{self, Offender};
use std::collections::HashSet;

const MIMETYPE_CONTENTS: &[u8] = b"application/epub+zip";

/// Runs every OCF-phase rule. Returns `true` if the phase should be
/// considered fatal (the controller must not proceed to the OPF phase).
pub(crate) fn run(archive: &dyn Archive, container: Option<&ContainerModel>, report: &mut Report) -> bool {
    let mut fatal = false;

    if !check_utf8_names(archive, report) {
        return true;
    }
    check_mimetype(archive, report);
    check_filename_lexicon(archive, report);
    check_duplicate_names(archive, report);
    check_encryption_and_signatures(archive, report);

    if let Some(container) = container {
        fatal |= check_container(container, archive, report);
    }
    fatal
}

/// `META-INF/encryption.xml` / `META-INF/signatures.xml` (§4.6 "Encryption.xml
/// / signatures.xml"): well-formedness, an informational note that
/// encryption is in use, and a content-model walk over `EncryptedData`
/// blocks for malformed `Compression` attributes and duplicate `Id`s.
fn check_encryption_and_signatures(archive: &dyn Archive, report: &mut Report) {
    for (name, root_name) in [("META-INF/encryption.xml", "encryption"), ("META-INF/signatures.xml", "signatures")] {
        let Ok(bytes) = archive.read(name) else { continue };
        if name == "META-INF/encryption.xml" {
            report.info("RSC-004", "package uses `META-INF/encryption.xml` (content is encrypted)");
        }
        walk_encryption_document(&bytes, root_name, report);
    }
}

fn walk_encryption_document(bytes: &[u8], expected_root: &str, report: &mut Report) {
    let mut reader = XmlReader::from_bytes(false, bytes);
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut root_checked = false;

    loop {
        let Some(event) = reader.next() else { break };
        let el = match event {
            Ok(XmlEvent::Start(el)) => el,
            Ok(_) => continue,
            Err(_) => {
                report.fatal("RSC-005", format!("`META-INF/{expected_root}.xml` is not well-formed XML"));
                return;
            }
        };
        let local = el.local_name_str().into_owned();

        if !root_checked {
            root_checked = true;
            if local != expected_root {
                report.error("RSC-005", format!("`META-INF/{expected_root}.xml` root element is `{local}`, expected `{expected_root}`"));
            }
        }

        if let Some(id) = el.get_attribute("Id")
            && !seen_ids.insert(id.clone())
        {
            report.error("RSC-005", format!("duplicate `Id` `{id}` in `META-INF/{expected_root}.xml`"));
        }

        match local.as_str() {
            "Compression" => {
                if let Some(method) = el.get_attribute("Method")
                    && method != "0"
                    && method != "8"
                {
                    report.error("RSC-005", format!("`Compression@Method` value `{method}` must be `0` or `8`"));
                }
            }
            "OriginalLength" if !el.is_self_closing() => {
                let text = reader.get_element_text(&el).unwrap_or_default();
                if text.trim().is_empty() {
                    report.error("RSC-005", "`OriginalLength` must not be empty");
                }
            }
            _ => {}
        }
    }
}

fn check_utf8_names(archive: &dyn Archive, report: &mut Report) -> bool {
    // Entry names are surfaced as `String` by the loader already; any entry
    // whose raw bytes were not valid UTF-8 was lossily converted there. We
    // detect that case via the presence of the replacement character, which
    // a legitimate EPUB filename should never contain (`PKG-009` would also
    // flag it, but this is a phase-fatal distinct from a diagnosable one).
    for entry in archive.entries() {
        if entry.name().contains('\u{FFFD}') {
            report.fatal("PKG-027", format!("entry name `{}` is not valid UTF-8", entry.name()));
            return false;
        }
    }
    true
}

fn check_mimetype(archive: &dyn Archive, report: &mut Report) {
    let Some(entry) = archive.lookup("mimetype") else {
        report.error("PKG-006", "archive has no `mimetype` entry");
        return;
    };

    if entry.index() != 0 {
        report.error("PKG-007", "`mimetype` entry is not the first entry in the archive");
    }

    match archive.read("mimetype") {
        Ok(bytes) if bytes == MIMETYPE_CONTENTS => {}
        Ok(_) => report.error("PKG-007", "`mimetype` entry does not contain exactly `application/epub+zip`"),
        Err(_) => report.error("PKG-007", "`mimetype` entry could not be read"),
    }

    if let Some(header) = archive.raw_local_header(entry.index()) {
        if header.extra_field_length() != 0 {
            report.error("PKG-005", "`mimetype` local header has a non-zero extra-field length");
        }
        if header.compression_method() != CompressionMethod::Stored {
            report.error("PKG-005", "`mimetype` entry must be stored, not compressed");
        }
    }
}

fn check_filename_lexicon(archive: &dyn Archive, report: &mut Report) {
    for entry in archive.entries() {
        let name = entry.name();
        if entry.is_directory() {
            continue;
        }
        if name.len() > 65535 {
            report.error("PKG-016", format!("entry name `{name}` exceeds 65535 bytes"));
        }
        if name.ends_with('.') {
            report.error("PKG-011", format!("entry name `{name}` ends with a trailing `.`"));
        }
        if !name.is_ascii() {
            report.info("PKG-012", format!("entry name `{name}` contains non-ASCII characters"));
        }

        let mut offenders: Vec<Offender> = Vec::new();
        let mut space_found = false;
        for c in name.chars() {
            if unicode::is_space(c) {
                space_found = true;
                continue;
            }
            if let Some(offender) = unicode::classify(c) {
                offenders.push(offender);
            }
        }

        if space_found && name != "mimetype" {
            report.warning("PKG-010", format!("entry name `{name}` contains a space character"));
        } else if !offenders.is_empty() {
            let list = offenders
                .iter()
                .map(|o| format!("U+{:04X} ({})", o.codepoint as u32, o.description))
                .collect::<Vec<_>>()
                .join(", ");
            report.error("PKG-009", format!("entry name `{name}` contains forbidden code points: {list}"));
        }
    }

    for entry in archive.entries() {
        if entry.is_directory() && !archive.entries().iter().any(|other| other.name() != entry.name() && other.name().starts_with(entry.name())) {
            report.warning("PKG-014", format!("directory entry `{}` has no descendants", entry.name()));
        }
    }
}

fn check_duplicate_names(archive: &dyn Archive, report: &mut Report) {
    let mut seen: Vec<(String, &str)> = Vec::new();
    for entry in archive.entries() {
        let key = unicode::identity_key(entry.name());
        if let Some((_, original)) = seen.iter().find(|(k, _)| *k == key) {
            report.error("OPF-060", format!("entry `{}` duplicates `{}` under Unicode case folding", entry.name(), original));
        } else {
            seen.push((key, entry.name()));
        }
    }
}

fn check_container(container: &ContainerModel, archive: &dyn Archive, report: &mut Report) -> bool {
    let mut fatal = false;

    if !container.unknown_elements.is_empty() {
        for element in &container.unknown_elements {
            report.error("RSC-005", format!("unexpected element `{element}` in container.xml"));
        }
    }

    match container.version.as_deref() {
        Some("1.0") => {}
        Some(other) => report.error("OCF-014", format!("container version `{other}` must be `1.0`")),
        None => report.error("OCF-014", "container element has no `version` attribute"),
    }

    if container.opf_rootfile_count() > 1 {
        report.error("PKG-013", "more than one rootfile declares the OEBPS package media type");
    }

    for rootfile in &container.rootfiles {
        if rootfile.has_missing_full_path() {
            report.error("OPF-017", "rootfile element has no `full-path` attribute");
        } else if rootfile.has_empty_full_path() {
            report.error("OPF-016", "rootfile element has an empty `full-path` attribute");
        }
        if let Some(media_type) = &rootfile.media_type
            && media_type != "application/oebps-package+xml"
            && !media_type.is_empty()
        {
            report.error("RSC-003", format!("rootfile media-type `{media_type}` is not the OEBPS package type"));
        }
    }

    match container.primary() {
        None => {
            report.fatal("OPF-002", "container.xml declares no rootfile");
            fatal = true;
        }
        Some(primary) => {
            if let Some(path) = primary.full_path.as_deref()
                && !path.is_empty()
                && archive.lookup(path).is_none()
            {
                report.fatal("OPF-002", format!("primary rootfile `{path}` is not present in the archive"));
                fatal = true;
            }
        }
    }

    fatal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::single::SingleFileArchive;

    #[test]
    fn test_filename_lexicon_flags_control_character() {
        let archive = SingleFileArchive::new("bad\u{0001}name.opf".to_owned(), b"<package/>".to_vec());
        let mut report = Report::default();
        check_filename_lexicon(&archive, &mut report);
        assert_eq!(1, report.count_by_code("PKG-009"));
    }

    #[test]
    fn test_filename_space_shadows_forbidden_report() {
        let archive = SingleFileArchive::new("bad name.opf".to_owned(), b"<package/>".to_vec());
        let mut report = Report::default();
        check_filename_lexicon(&archive, &mut report);
        assert_eq!(1, report.count_by_code("PKG-010"));
        assert_eq!(0, report.count_by_code("PKG-009"));
    }

    #[test]
    fn test_trailing_dot_flagged() {
        let archive = SingleFileArchive::new("content.opf.".to_owned(), b"<package/>".to_vec());
        let mut report = Report::default();
        check_filename_lexicon(&archive, &mut report);
        assert_eq!(1, report.count_by_code("PKG-011"));
    }

    #[test]
    fn test_encryption_present_is_informational() {
        let xml = br#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
            <EncryptedData>
                <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-cbc"/>
                <CipherData><CipherReference URI="OEBPS/font.otf"/></CipherData>
            </EncryptedData>
        </encryption>"#;
        let archive = SingleFileArchive::new("META-INF/encryption.xml".to_owned(), xml.to_vec());
        let mut report = Report::default();
        check_encryption_and_signatures(&archive, &mut report);
        assert_eq!(1, report.count_by_code("RSC-004"));
        assert_eq!(0, report.count_by_code("RSC-005"));
    }

    #[test]
    fn test_encryption_bad_compression_method_flagged() {
        let xml = br#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
            <EncryptedData>
                <EncryptionProperty>
                    <Compression Method="99" OriginalLength="100"/>
                </EncryptionProperty>
            </EncryptedData>
        </encryption>"#;
        let archive = SingleFileArchive::new("META-INF/encryption.xml".to_owned(), xml.to_vec());
        let mut report = Report::default();
        check_encryption_and_signatures(&archive, &mut report);
        assert_eq!(1, report.count_by_code("RSC-005"));
    }

    #[test]
    fn test_encryption_duplicate_id_flagged() {
        let xml = br#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
            <EncryptedData Id="e1"/>
            <EncryptedData Id="e1"/>
        </encryption>"#;
        let archive = SingleFileArchive::new("META-INF/encryption.xml".to_owned(), xml.to_vec());
        let mut report = Report::default();
        check_encryption_and_signatures(&archive, &mut report);
        assert_eq!(1, report.count_by_code("RSC-005"));
    }

    #[test]
    fn test_encryption_wrong_root_element_flagged() {
        let xml = br#"<bogus xmlns="urn:oasis:names:tc:opendocument:xmlns:container"/>"#;
        let archive = SingleFileArchive::new("META-INF/encryption.xml".to_owned(), xml.to_vec());
        let mut report = Report::default();
        check_encryption_and_signatures(&archive, &mut report);
        assert_eq!(1, report.count_by_code("RSC-005"));
    }
}
