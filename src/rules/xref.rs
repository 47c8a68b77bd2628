//! Cross-Reference Phase rules (§4.8): manifest hrefs against the archive,
//! archive entries against the manifest, referenced stylesheet resources,
//! IDPF font obfuscation, duplicate ZIP entries.

use crate::archive::Archive;
use crate::model::package::PackageModel;
use crate::report::Report;
use crate::util::uri;

const OCF_METADATA_EXCEPTIONS: &[&str] =
    &["mimetype", "META-INF/container.xml", "META-INF/encryption.xml", "META-INF/signatures.xml", "META-INF/metadata.xml", "META-INF/rights.xml", "META-INF/manifest.xml"];

/// Runs every Cross-Reference-phase rule against an already-open archive, a
/// loaded package, and (when not in single-file mode) the loaded container.
pub(crate) fn run(archive: &dyn Archive, package: &PackageModel, archive_membership_applies: bool, report: &mut Report) {
    check_manifest_vs_archive(archive, package, report);
    if archive_membership_applies {
        check_archive_vs_manifest(archive, package, report);
    }
    check_referenced_stylesheets(archive, package, report);
    check_obfuscation(archive, package, report);
    check_metadata_link_targets(archive, package, report);
}

/// `RSC-007w` (§4.7 "Metadata links"): a local (non-remote) metadata
/// `link/@href` must resolve to an existing archive entry.
fn check_metadata_link_targets(archive: &dyn Archive, package: &PackageModel, report: &mut Report) {
    for link in &package.metadata_links {
        let Some(href) = &link.href else { continue };
        if uri::is_remote(href) || uri::is_data_url(href) || uri::is_file_url(href) {
            continue;
        }
        let resolved = package.resolve_href(uri::path(href));
        if archive.lookup(&resolved).is_none() {
            report.warning("RSC-007w", format!("metadata link `{href}` does not resolve to an archive entry"));
        }
    }
}

fn check_manifest_vs_archive(archive: &dyn Archive, package: &PackageModel, report: &mut Report) {
    for item in &package.manifest {
        let Some(href) = &item.href else { continue };

        if uri::is_remote(href) {
            if item.media_type.as_str() == Some("application/xhtml+xml") {
                report.error("RSC-006", format!("manifest item `{href}` is a remote XHTML resource"));
            }
            continue;
        }
        if uri::is_file_url(href) {
            report.error("RSC-030", format!("manifest item `{href}` uses a `file:` URL"));
            continue;
        }
        if uri::has_parent_traversal(href) {
            if href.contains("META-INF/") {
                report.error("PKG-025", format!("manifest item `{href}` traverses into `META-INF/`"));
            } else {
                report.error("RSC-026", format!("manifest item `{href}` traverses above its starting directory"));
            }
            continue;
        }

        let decoded = uri::decode(href);
        if archive.lookup(&decoded).is_none() {
            let code = if item.media_type.as_str() == Some("text/css") {
                "RSC-005"
            } else if item.media_type.as_str().map(|m| m.starts_with("font/") || m.contains("opentype") || m.contains("woff")).unwrap_or(false) {
                "RSC-009"
            } else {
                "RSC-001"
            };
            report.error(code, format!("manifest item href `{href}` does not resolve to an archive entry"));
        }
    }
}

fn check_archive_vs_manifest(archive: &dyn Archive, package: &PackageModel, report: &mut Report) {
    let declared: Vec<&str> = package.manifest.iter().filter_map(|item| item.href.as_deref()).collect();

    for entry in archive.entries() {
        if entry.is_directory() {
            continue;
        }
        let name = entry.name();
        if OCF_METADATA_EXCEPTIONS.contains(&name) || name.starts_with("META-INF/") {
            continue;
        }
        if name == package.location.trim_start_matches('/') || name == package.location {
            continue;
        }
        let absolute = uri::into_absolute(name.to_owned());
        if !declared.iter().any(|href| *href == absolute || *href == name) {
            report.warning("RSC-002w", format!("archive entry `{name}` is not declared in the manifest"));
        }
    }
}

fn check_referenced_stylesheets(archive: &dyn Archive, package: &PackageModel, report: &mut Report) {
    for item in &package.manifest {
        if item.media_type.as_str() != Some("application/xhtml+xml") {
            continue;
        }
        let Some(href) = &item.href else { continue };
        let decoded = uri::decode(href);
        let Ok(bytes) = archive.read(&decoded) else { continue };
        let text = String::from_utf8_lossy(&bytes);

        for stylesheet_href in extract_stylesheet_links(&text) {
            if uri::is_remote(&stylesheet_href) {
                continue;
            }
            let resolved = package.resolve_href(&stylesheet_href);
            if archive.lookup(&resolved).is_none() {
                report.error("RSC-005", format!("stylesheet `{stylesheet_href}` referenced from `{href}` does not exist"));
            } else if !package.manifest.iter().any(|m| m.href.as_deref() == Some(resolved.as_str())) {
                report.error("RSC-006", format!("stylesheet `{stylesheet_href}` referenced from `{href}` is not in the manifest"));
            }
        }
    }
}

/// Crude `<link rel="stylesheet" href="...">` extraction: the engine does
/// not carry a full XHTML/CSS tokenizer (out of scope per the spec's
/// non-goals), so referenced-resource scanning is a regex sweep over raw
/// bytes rather than a structural parse.
fn extract_stylesheet_links(text: &str) -> Vec<String> {
    let mut hrefs = Vec::new();
    for link_tag in text.match_indices("<link").map(|(i, _)| i) {
        let Some(end) = text[link_tag..].find('>').map(|e| e + link_tag) else { continue };
        let tag = &text[link_tag..end];
        if !tag.contains("stylesheet") {
            continue;
        }
        if let Some(href) = extract_attr(tag, "href") {
            hrefs.push(href);
        }
    }
    hrefs
}

fn extract_attr(tag: &str, key: &str) -> Option<String> {
    let marker = format!("{key}=\"");
    let start = tag.find(&marker)? + marker.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_owned())
}

fn check_obfuscation(archive: &dyn Archive, package: &PackageModel, report: &mut Report) {
    let Ok(bytes) = archive.read("META-INF/encryption.xml") else { return };
    let text = String::from_utf8_lossy(&bytes);

    for block_start in text.match_indices("<EncryptedData").map(|(i, _)| i) {
        let Some(block_end) = text[block_start..].find("</EncryptedData>").map(|e| e + block_start) else { continue };
        let block = &text[block_start..block_end];
        if !block.contains("http://www.idpf.org/2008/embedding") {
            continue;
        }
        let Some(uri_attr) = extract_cipher_reference(block) else { continue };
        let resolved = uri::into_absolute(uri_attr.clone());
        let is_font = package
            .manifest
            .iter()
            .find(|item| item.href.as_deref() == Some(resolved.as_str()))
            .map(|item| item.media_type.as_str().map(is_font_media_type).unwrap_or(false))
            .unwrap_or(false);

        if !is_font {
            report.error("PKG-026", format!("`{uri_attr}` is obfuscated with the IDPF algorithm but is not a font"));
        }
    }
}

fn is_font_media_type(media_type: &str) -> bool {
    media_type.starts_with("font/") || media_type.contains("opentype") || media_type.contains("woff")
}

fn extract_cipher_reference(block: &str) -> Option<String> {
    let start = block.find("<CipherReference")?;
    let end = block[start..].find('>').map(|e| e + start)?;
    extract_attr(&block[start..end], "URI")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::single::SingleFileArchive;
    use crate::model::attr::AttrValue;
    use crate::model::package::ManifestItem;

    #[test]
    fn test_missing_manifest_target_reported() {
        let archive = SingleFileArchive::new("content.opf".to_owned(), b"<package/>".to_vec());
        let mut package = PackageModel { location: "/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("c1".to_owned()),
            href_raw: AttrValue::Value("chapter1.xhtml".to_owned()),
            href: Some("/chapter1.xhtml".to_owned()),
            media_type: AttrValue::Value("application/xhtml+xml".to_owned()),
            ..Default::default()
        });
        let mut report = Report::default();
        check_manifest_vs_archive(&archive, &package, &mut report);
        assert_eq!(1, report.count_by_code("RSC-001"));
    }

    #[test]
    fn test_remote_xhtml_reported() {
        let archive = SingleFileArchive::new("content.opf".to_owned(), b"<package/>".to_vec());
        let mut package = PackageModel { location: "/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("c1".to_owned()),
            href_raw: AttrValue::Value("http://example.com/c1.xhtml".to_owned()),
            href: Some("http://example.com/c1.xhtml".to_owned()),
            media_type: AttrValue::Value("application/xhtml+xml".to_owned()),
            ..Default::default()
        });
        let mut report = Report::default();
        check_manifest_vs_archive(&archive, &package, &mut report);
        assert_eq!(1, report.count_by_code("RSC-006"));
    }

    #[test]
    fn test_traversal_into_meta_inf_reported_as_pkg025() {
        let archive = SingleFileArchive::new("content.opf".to_owned(), b"<package/>".to_vec());
        let mut package = PackageModel { location: "/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("sneaky".to_owned()),
            href_raw: AttrValue::Value("../META-INF/container.xml".to_owned()),
            href: Some("../META-INF/container.xml".to_owned()),
            media_type: AttrValue::Value("application/xml".to_owned()),
            ..Default::default()
        });
        let mut report = Report::default();
        check_manifest_vs_archive(&archive, &package, &mut report);
        assert_eq!(1, report.count_by_code("PKG-025"));
        assert_eq!(0, report.count_by_code("RSC-026"));
    }

    #[test]
    fn test_traversal_outside_meta_inf_reported_as_rsc026() {
        let archive = SingleFileArchive::new("content.opf".to_owned(), b"<package/>".to_vec());
        let mut package = PackageModel { location: "/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("sneaky".to_owned()),
            href_raw: AttrValue::Value("../../etc/passwd".to_owned()),
            href: Some("../../etc/passwd".to_owned()),
            media_type: AttrValue::Value("application/xml".to_owned()),
            ..Default::default()
        });
        let mut report = Report::default();
        check_manifest_vs_archive(&archive, &package, &mut report);
        assert_eq!(1, report.count_by_code("RSC-026"));
    }

    #[test]
    fn test_obfuscated_non_font_reported() {
        let encryption = br#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
            <EncryptedData>
                <EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
                <CipherData><CipherReference URI="OEBPS/img.png"/></CipherData>
            </EncryptedData>
        </encryption>"#;
        let archive = SingleFileArchive::new("META-INF/encryption.xml".to_owned(), encryption.to_vec());
        let mut package = PackageModel::default();
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("img".to_owned()),
            href_raw: AttrValue::Value("OEBPS/img.png".to_owned()),
            href: Some("/OEBPS/img.png".to_owned()),
            media_type: AttrValue::Value("image/png".to_owned()),
            ..Default::default()
        });
        let mut report = Report::default();
        check_obfuscation(&archive, &package, &mut report);
        assert_eq!(1, report.count_by_code("PKG-026"));
        assert!(report.messages()[0].message.contains("OEBPS/img.png"));
    }

    #[test]
    fn test_obfuscated_font_not_reported() {
        let encryption = br#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
            <EncryptedData>
                <EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
                <CipherData><CipherReference URI="OEBPS/font.otf"/></CipherData>
            </EncryptedData>
        </encryption>"#;
        let archive = SingleFileArchive::new("META-INF/encryption.xml".to_owned(), encryption.to_vec());
        let mut package = PackageModel::default();
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("font".to_owned()),
            href_raw: AttrValue::Value("OEBPS/font.otf".to_owned()),
            href: Some("/OEBPS/font.otf".to_owned()),
            media_type: AttrValue::Value("application/vnd.ms-opentype".to_owned()),
            ..Default::default()
        });
        let mut report = Report::default();
        check_obfuscation(&archive, &package, &mut report);
        assert_eq!(0, report.count_by_code("PKG-026"));
    }

    #[test]
    fn test_missing_local_metadata_link_target_reported() {
        use crate::model::package::MetadataLink;

        let archive = SingleFileArchive::new("content.opf".to_owned(), b"<package/>".to_vec());
        let mut package = PackageModel { location: "/content.opf".to_owned(), ..Default::default() };
        package.metadata_links.push(MetadataLink {
            href: Some("missing-record.xml".to_owned()),
            rel: vec!["marc21xml-record".to_owned()],
            media_type: Some("application/marc".to_owned()),
            hreflang: None,
            properties: Vec::new(),
            refines: None,
        });
        let mut report = Report::default();
        check_metadata_link_targets(&archive, &package, &mut report);
        assert_eq!(1, report.count_by_code("RSC-007w"));
    }
}
