//! Navigation Phase rules (§4.9): toc/landmarks/page-list structural
//! requirements, link resolution, TOC ordering, and usage-severity
//! accessibility observations.

use crate::archive::Archive;
use crate::model::nav::NavModel;
use crate::model::package::PackageModel;
use crate::parser::xml::{XmlEvent, XmlReader};
use crate::report::Report;
use crate::util::uri;
use indexmap::IndexMap;
use std::collections::HashMap;

pub(crate) fn run(archive: &dyn Archive, package: &PackageModel, nav: &NavModel, nav_location: &str, report: &mut Report) {
    check_toc_presence(nav, report);
    check_toc_has_ol(nav, report);
    check_hidden_nav(nav, report);
    check_link_text(nav, report);
    check_remote_links_forbidden(nav, report);

    let spine_position = build_spine_position_map(package);
    check_link_resolution(archive, package, nav, nav_location, report);
    check_toc_order(archive, nav, &spine_position, package, report);
    check_page_list_requirements(package, nav, report);
    check_reachability(package, nav, report);
    check_accessibility(archive, package, nav, report);
}

fn check_toc_presence(nav: &NavModel, report: &mut Report) {
    match nav.toc_count {
        0 => report.error("NAV-001", "navigation document has no `nav[epub:type=toc]`"),
        1 => {}
        _ => {
            report.error("OPF-026", "more than one `nav[epub:type=toc]` in the package");
            report.error("NAV-005", "more than one `nav[epub:type=toc]` in the navigation document");
        }
    }
}

fn check_toc_has_ol(nav: &NavModel, report: &mut Report) {
    if nav.toc_count > 0 && !nav.toc_has_ol {
        report.error("NAV-008", "`nav[epub:type=toc]` must directly contain an `ol`");
    }
}

fn check_hidden_nav(nav: &NavModel, report: &mut Report) {
    if nav.has_hidden_nav {
        report.warning("NAV-009", "`nav[epub:type=toc]` carries a `hidden` attribute");
    }
}

fn check_link_text(nav: &NavModel, report: &mut Report) {
    for link in &nav.toc_links {
        if link.text.trim().is_empty() {
            report.error("NAV-004", "toc anchor text must be non-empty after trimming whitespace");
        }
    }
}

fn check_remote_links_forbidden(nav: &NavModel, report: &mut Report) {
    let all_links = nav.toc_links.iter().chain(nav.landmark_links.iter()).chain(nav.page_list_links.iter());
    for link in all_links {
        if let Some(href) = &link.href
            && uri::is_remote(href)
        {
            report.error("NAV-010", format!("remote href `{href}` is forbidden in toc/landmarks/page-list"));
        }
    }
}

fn build_spine_position_map(package: &PackageModel) -> IndexMap<String, usize> {
    let mut map = IndexMap::new();
    for (index, itemref) in package.spine.iter().enumerate() {
        let Some(idref) = itemref.idref.as_str() else { continue };
        let Some(item) = package.manifest_by_id(idref) else { continue };
        let Some(href) = &item.href else { continue };
        map.insert(href.clone(), index);
    }
    map
}

fn check_link_resolution(archive: &dyn Archive, package: &PackageModel, nav: &NavModel, nav_location: &str, report: &mut Report) {
    let nav_dir = crate::util::uri::parent(nav_location);

    for link in nav.toc_links.iter().chain(nav.landmark_links.iter()).chain(nav.page_list_links.iter()) {
        let Some(href) = &link.href else { continue };
        if uri::is_remote(href) || href.starts_with("epubcfi(") {
            continue;
        }

        let path = uri::path(href);
        if path.is_empty() {
            // Fragment-only: must resolve within the nav document itself.
            continue;
        }

        let resolved = uri::resolve(nav_dir, path).into_owned();
        let exists = archive.lookup(&resolved).is_some() || archive.lookup(&crate::util::unicode::identity_key(&resolved)).is_some();
        if !exists {
            report.error("NAV-003", format!("toc link target `{href}` does not exist in the archive"));
            continue;
        }

        let target = package.manifest_by_href(&resolved);
        match target {
            None => report.error("RSC-011", format!("toc link target `{resolved}` is not declared in the manifest")),
            Some(item) => {
                let is_content = item.media_type.as_str().map(|m| m == "application/xhtml+xml" || m == "image/svg+xml").unwrap_or(false);
                if !is_content {
                    report.error("RSC-010", format!("toc link target `{resolved}` is not an XHTML or SVG content document"));
                }
                if !package.spine.iter().any(|itemref| itemref.idref.as_str() == item.id.as_str()) {
                    report.error("RSC-011", format!("toc link target `{resolved}` is not referenced from the spine"));
                }
            }
        }
    }
}

fn check_toc_order(archive: &dyn Archive, nav: &NavModel, spine_position: &IndexMap<String, usize>, package: &PackageModel, report: &mut Report) {
    let mut last_position: Option<usize> = None;
    let mut last_fragment_offset: Option<usize> = None;
    let mut id_offset_cache: HashMap<String, HashMap<String, usize>> = HashMap::new();

    for link in &nav.toc_links {
        let Some(href) = &link.href else { continue };
        let path = uri::path(href);
        let path_key = if path.is_empty() { None } else { Some(package.resolve_href(path)) };
        let Some(position) = path_key.as_deref().and_then(|p| spine_position.get(p)).copied() else {
            continue;
        };
        let doc_path = path_key.expect("spine_position lookup above only succeeds when `path_key` is `Some`");

        // "within the same document" (§4.9 NAV-011): the byte offset of the
        // fragment's id *inside the referenced content document*, not the
        // offset of the `<a>` in the nav document (that offset is always
        // increasing by construction of the single forward scan that builds
        // `toc_links`).
        let fragment_offset = uri::fragment(href).and_then(|fragment| fragment_offset_in_document(archive, &mut id_offset_cache, &doc_path, fragment));

        let out_of_order = match last_position {
            Some(last) if position < last => true,
            Some(last) if position == last => match (last_fragment_offset, fragment_offset) {
                (Some(last_offset), Some(offset)) => offset < last_offset,
                _ => false,
            },
            _ => false,
        };
        if out_of_order {
            report.warning("NAV-011", format!("toc link `{href}` is out of spine order"));
        }
        last_position = Some(position);
        last_fragment_offset = fragment_offset;
    }
}

/// Byte offset of the element carrying `id="{fragment}"` inside the content
/// document at `doc_path`, memoized per document across the whole toc-order
/// walk (§4.9 NAV-011, §9 "lightweight re-tokenization recording element
/// start offsets").
fn fragment_offset_in_document(
    archive: &dyn Archive,
    cache: &mut HashMap<String, HashMap<String, usize>>,
    doc_path: &str,
    fragment: &str,
) -> Option<usize> {
    if !cache.contains_key(doc_path) {
        let offsets = archive.read(doc_path).map(|bytes| collect_id_offsets(&bytes)).unwrap_or_default();
        cache.insert(doc_path.to_owned(), offsets);
    }
    cache.get(doc_path).and_then(|offsets| offsets.get(fragment)).copied()
}

fn collect_id_offsets(bytes: &[u8]) -> HashMap<String, usize> {
    let mut reader = XmlReader::from_bytes(false, bytes);
    let mut offsets = HashMap::new();
    while let Some(event) = reader.next() {
        let Ok(XmlEvent::Start(el)) = event else { continue };
        let offset = reader.input_offset();
        if let Some(id) = el.get_attribute("id") {
            offsets.entry(id).or_insert(offset);
        }
    }
    offsets
}

fn check_page_list_requirements(package: &PackageModel, nav: &NavModel, report: &mut Report) {
    if !nav.has_page_list {
        return;
    }
    let has_source = !package.metadata.sources.is_empty();
    let has_pagination_meta = package.meta_refines.iter().any(|r| r.property == "source-of" && r.value == "pagination");
    if !has_source || !has_pagination_meta {
        report.error("OPF-066", "a `page-list` nav requires `dc:source` and a `source-of: pagination` refining meta");
    }
}

fn check_reachability(package: &PackageModel, nav: &NavModel, report: &mut Report) {
    let all_nav_hrefs: Vec<&str> = nav
        .toc_links
        .iter()
        .chain(nav.landmark_links.iter())
        .chain(nav.page_list_links.iter())
        .filter_map(|l| l.href.as_deref())
        .collect();

    for itemref in &package.spine {
        if itemref.is_linear() {
            continue;
        }
        let Some(idref) = itemref.idref.as_str() else { continue };
        let Some(item) = package.manifest_by_id(idref) else { continue };
        let Some(href) = &item.href else { continue };

        let reachable = all_nav_hrefs.iter().any(|nav_href| uri::path(nav_href).ends_with(uri::filename(href)));
        if !reachable {
            if item.has_property("scripted") {
                report.usage("OPF-096b", format!("non-linear item `{idref}` is unreachable but is scripted"));
            } else {
                report.error("OPF-096", format!("non-linear item `{idref}` is not reachable from any navigation link"));
            }
        }
    }
}

fn check_accessibility(archive: &dyn Archive, package: &PackageModel, nav: &NavModel, report: &mut Report) {
    let has_a11y_meta = package.primary_metas.iter().any(|m| m.property.starts_with("schema:accessibility"));
    if !has_a11y_meta {
        report.usage("ACC-001", "no schema.org accessibility metadata declared");
    }
    if !nav.has_landmarks {
        report.usage("ACC-002", "no `landmarks` navigation list declared");
    }
    if !package.metadata.sources.is_empty() && !nav.has_page_list {
        report.usage("ACC-004", "`dc:source` declared but no `page-list` navigation provided");
    }
    check_content_document_accessibility(archive, package, report);
}

/// `ACC-003`/`ACC-005` (§4.9 "Accessibility"): per-document observations that
/// need the content documents' own bytes, not just the package metadata —
/// a missing `html@lang`/`xml:lang` and an `<img>` with no `alt`.
fn check_content_document_accessibility(archive: &dyn Archive, package: &PackageModel, report: &mut Report) {
    for itemref in &package.spine {
        let Some(idref) = itemref.idref.as_str() else { continue };
        let Some(item) = package.manifest_by_id(idref) else { continue };
        if item.media_type.as_str() != Some("application/xhtml+xml") {
            continue;
        }
        let Some(href) = &item.href else { continue };
        let Ok(bytes) = archive.read(href) else { continue };
        scan_content_document_accessibility(&bytes, href, report);
    }
}

fn scan_content_document_accessibility(bytes: &[u8], href: &str, report: &mut Report) {
    let mut reader = XmlReader::from_bytes(false, bytes);
    let mut html_seen = false;

    while let Some(event) = reader.next() {
        let Ok(XmlEvent::Start(el)) = event else { continue };
        if !html_seen && el.is_local_name("html") {
            html_seen = true;
            if el.get_attribute("lang").or_else(|| el.get_attribute("xml:lang")).is_none() {
                report.usage("ACC-003", format!("`{href}` has no `html@lang`/`xml:lang`"));
            }
        }
        if el.is_local_name("img") && !el.has_attribute("alt") {
            report.usage("ACC-005", format!("`<img>` in `{href}` has no `alt` attribute"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::single::SingleFileArchive;
    use crate::model::attr::AttrValue;
    use crate::model::nav::NavLink;
    use crate::model::package::{ManifestItem, SpineRef};

    fn unused_archive() -> SingleFileArchive {
        SingleFileArchive::new("unused".to_owned(), Vec::new())
    }

    #[test]
    fn test_toc_order_flags_spine_position_regression() {
        let mut package = PackageModel { location: "/OEBPS/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem { id: AttrValue::Value("d1".to_owned()), href: Some("/OEBPS/d1.xhtml".to_owned()), ..Default::default() });
        package.manifest.push(ManifestItem { id: AttrValue::Value("d2".to_owned()), href: Some("/OEBPS/d2.xhtml".to_owned()), ..Default::default() });
        package.manifest.push(ManifestItem { id: AttrValue::Value("d3".to_owned()), href: Some("/OEBPS/d3.xhtml".to_owned()), ..Default::default() });
        package.spine = vec![
            SpineRef { idref: AttrValue::Value("d1".to_owned()), linear: None, properties: vec![], id: None },
            SpineRef { idref: AttrValue::Value("d2".to_owned()), linear: None, properties: vec![], id: None },
            SpineRef { idref: AttrValue::Value("d3".to_owned()), linear: None, properties: vec![], id: None },
        ];

        let mut nav = NavModel::default();
        nav.toc_links = vec![
            NavLink { href: Some("d1.xhtml".to_owned()), text: "One".to_owned() },
            NavLink { href: Some("d3.xhtml".to_owned()), text: "Three".to_owned() },
            NavLink { href: Some("d2.xhtml".to_owned()), text: "Two".to_owned() },
        ];

        let spine_position = build_spine_position_map(&package);
        let archive = unused_archive();
        let mut report = Report::default();
        check_toc_order(&archive, &nav, &spine_position, &package, &mut report);
        assert_eq!(1, report.count_by_code("NAV-011"));
    }

    /// Two toc links resolving to the *same* spine position (the same
    /// content document) must be compared by the byte offset of their
    /// fragment's `id` within that document, not nav-document order
    /// (§4.9 NAV-011, §8 scenario-adjacent invariant).
    #[test]
    fn test_toc_order_flags_same_document_fragment_regression() {
        let mut package = PackageModel { location: "/OEBPS/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem { id: AttrValue::Value("d1".to_owned()), href: Some("/OEBPS/d1.xhtml".to_owned()), ..Default::default() });
        package.spine = vec![SpineRef { idref: AttrValue::Value("d1".to_owned()), linear: None, properties: vec![], id: None }];

        let mut nav = NavModel::default();
        nav.toc_links = vec![
            NavLink { href: Some("d1.xhtml#a".to_owned()), text: "A".to_owned() },
            NavLink { href: Some("d1.xhtml#b".to_owned()), text: "B".to_owned() },
        ];

        // `id="b"` appears before `id="a"` in document order, so listing `a`
        // before `b` in the toc is a regression.
        let doc = br#"<html xmlns="http://www.w3.org/1999/xhtml"><body><p id="b">B</p><p id="a">A</p></body></html>"#;
        let archive = SingleFileArchive::new("/OEBPS/d1.xhtml".to_owned(), doc.to_vec());

        let spine_position = build_spine_position_map(&package);
        let mut report = Report::default();
        check_toc_order(&archive, &nav, &spine_position, &package, &mut report);
        assert_eq!(1, report.count_by_code("NAV-011"));
    }

    #[test]
    fn test_toc_order_same_document_fragments_in_order_not_flagged() {
        let mut package = PackageModel { location: "/OEBPS/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem { id: AttrValue::Value("d1".to_owned()), href: Some("/OEBPS/d1.xhtml".to_owned()), ..Default::default() });
        package.spine = vec![SpineRef { idref: AttrValue::Value("d1".to_owned()), linear: None, properties: vec![], id: None }];

        let mut nav = NavModel::default();
        nav.toc_links = vec![
            NavLink { href: Some("d1.xhtml#a".to_owned()), text: "A".to_owned() },
            NavLink { href: Some("d1.xhtml#b".to_owned()), text: "B".to_owned() },
        ];

        let doc = br#"<html xmlns="http://www.w3.org/1999/xhtml"><body><p id="a">A</p><p id="b">B</p></body></html>"#;
        let archive = SingleFileArchive::new("/OEBPS/d1.xhtml".to_owned(), doc.to_vec());

        let spine_position = build_spine_position_map(&package);
        let mut report = Report::default();
        check_toc_order(&archive, &nav, &spine_position, &package, &mut report);
        assert_eq!(0, report.count_by_code("NAV-011"));
    }

    #[test]
    fn test_content_document_missing_lang_reported() {
        let mut package = PackageModel { location: "/OEBPS/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("d1".to_owned()),
            href: Some("/OEBPS/d1.xhtml".to_owned()),
            media_type: AttrValue::Value("application/xhtml+xml".to_owned()),
            ..Default::default()
        });
        package.spine = vec![SpineRef { idref: AttrValue::Value("d1".to_owned()), linear: None, properties: vec![], id: None }];

        let doc = br#"<html xmlns="http://www.w3.org/1999/xhtml"><body><img src="a.png" alt="A"/></body></html>"#;
        let archive = SingleFileArchive::new("/OEBPS/d1.xhtml".to_owned(), doc.to_vec());

        let mut report = Report::default();
        check_content_document_accessibility(&archive, &package, &mut report);
        assert_eq!(1, report.count_by_code("ACC-003"));
        assert_eq!(0, report.count_by_code("ACC-005"));
    }

    #[test]
    fn test_content_document_missing_img_alt_reported() {
        let mut package = PackageModel { location: "/OEBPS/content.opf".to_owned(), ..Default::default() };
        package.manifest.push(ManifestItem {
            id: AttrValue::Value("d1".to_owned()),
            href: Some("/OEBPS/d1.xhtml".to_owned()),
            media_type: AttrValue::Value("application/xhtml+xml".to_owned()),
            ..Default::default()
        });
        package.spine = vec![SpineRef { idref: AttrValue::Value("d1".to_owned()), linear: None, properties: vec![], id: None }];

        let doc = br#"<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="en"><body><img src="a.png"/></body></html>"#;
        let archive = SingleFileArchive::new("/OEBPS/d1.xhtml".to_owned(), doc.to_vec());

        let mut report = Report::default();
        check_content_document_accessibility(&archive, &package, &mut report);
        assert_eq!(0, report.count_by_code("ACC-003"));
        assert_eq!(1, report.count_by_code("ACC-005"));
    }
}
