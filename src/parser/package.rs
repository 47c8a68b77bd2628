//! Builds a [`PackageModel`] from OPF bytes.
//!
//! Grounded on the teacher's `ebook::epub::parser::package` module tree
//! (one sub-parser per OPF child element — `metadata`, `manifest`, `spine`,
//! `guide`), generalized to retain every bit of "lossy" state a validator
//! needs and the teacher's read-only model discards: raw duplicate ids,
//! element order, empty-vs-missing attributes, and the refinement graph
//! rather than a single resolved value per property.

use crate::model::attr::AttrValue;
use crate::model::package::*;
use crate::parser::xml::{XmlEvent, XmlReader, XmlStartElement};
use crate::parser::ParserResult;
use indexmap::IndexMap;

const OEB1_NAMESPACE: &str = "http://openebook.org/namespaces/oeb-package/1.0/";

pub(crate) fn parse(bytes: &[u8], location: String, strict: bool) -> ParserResult<PackageModel> {
    let mut reader = XmlReader::from_bytes(strict, bytes);
    let mut model = PackageModel {
        location,
        ..Default::default()
    };

    while let Some(event) = reader.next() {
        let XmlEvent::Start(el) = event? else { continue };
        if el.is_local_name("package") {
            parse_package(&mut reader, &mut model, &el)?;
            break;
        }
    }
    Ok(model)
}

fn record_common(model: &mut PackageModel, el: &XmlStartElement) {
    if let Some(id) = el.get_attribute("id") {
        *model.xml_id_counts.entry(id).or_insert(0) += 1;
    }
    if let Some(lang) = el.get_attribute("xml:lang").or_else(|| el.get_attribute("lang")) {
        model.all_xml_langs.push(lang);
    }
}

fn parse_package(reader: &mut XmlReader, model: &mut PackageModel, el: &XmlStartElement) -> ParserResult<()> {
    model.version = AttrValue::from(el.get_attribute("version"));
    model.unique_identifier_ref = el.get_attribute("unique-identifier");
    model.prefix_decl = el.get_attribute("prefix");
    model.dir = el.get_attribute("dir");
    record_common(model, el);

    if el
        .attributes_ordered()
        .iter()
        .any(|(k, v)| (k == "xmlns" || k.starts_with("xmlns:")) && v == OEB1_NAMESPACE)
    {
        model.is_legacy_oeb1 = true;
    }

    if el.is_self_closing() {
        return Ok(());
    }

    loop {
        let Some(event) = reader.next() else { break };
        match event? {
            XmlEvent::Start(child) => {
                let local = child.local_name_str().into_owned();
                record_common(model, &child);
                model.element_order.push(local.clone());

                match local.as_str() {
                    "metadata" => {
                        model.has_metadata = true;
                        parse_metadata(reader, model, &child)?;
                    }
                    "manifest" => {
                        model.has_manifest = true;
                        parse_manifest(reader, model, &child)?;
                    }
                    "spine" => {
                        model.has_spine = true;
                        parse_spine(reader, model, &child)?;
                    }
                    "guide" => {
                        model.has_guide = true;
                        parse_guide(reader, model, &child)?;
                    }
                    "collection" => {
                        let collection = parse_collection(reader, model, &child, true)?;
                        model.collections.push(collection);
                    }
                    "bindings" | "tours" => {
                        reader.skip_element(&child)?;
                    }
                    _ => {
                        model.unknown_elements.push(local);
                        reader.skip_element(&child)?;
                    }
                }
            }
            XmlEvent::End(name) if name == b"package" => break,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------- metadata

fn parse_metadata(reader: &mut XmlReader, model: &mut PackageModel, container: &XmlStartElement) -> ParserResult<()> {
    if container.is_self_closing() {
        return Ok(());
    }
    let mut pending_refines: Vec<RefiningMeta> = Vec::new();

    loop {
        let Some(event) = reader.next() else { break };
        match event? {
            XmlEvent::Start(el) => {
                record_common(model, &el);
                let local = el.local_name_str().into_owned();
                let prefix = el.prefix().map(str::to_owned);

                if local == "meta" {
                    parse_meta(reader, model, &el, &mut pending_refines)?;
                } else if prefix.as_deref() == Some("dc") {
                    parse_dc_element(reader, model, &el, &local)?;
                } else {
                    reader.skip_element(&el)?;
                }
            }
            XmlEvent::End(name) if name == b"metadata" => break,
            _ => {}
        }
    }
    model.meta_refines.extend(pending_refines);
    Ok(())
}

fn parse_meta(
    reader: &mut XmlReader,
    model: &mut PackageModel,
    el: &XmlStartElement,
    pending_refines: &mut Vec<RefiningMeta>,
) -> ParserResult<()> {
    // OPF 2 legacy form: <meta name="..." content="..."/>
    if let Some(name) = el.get_attribute("name") {
        let content = el.get_attribute("content").unwrap_or_default();
        if content.is_empty() {
            model.meta_empty_values += 1;
        }
        model.primary_metas.push(PrimaryMeta {
            property: name,
            value: content,
            scheme: None,
            id: el.get_attribute("id"),
            lang: el.get_attribute("xml:lang"),
        });
        if !el.is_self_closing() {
            reader.skip_element(el)?;
        }
        return Ok(());
    }

    let property = el.get_attribute("property");
    let refines = el.get_attribute("refines").map(|r| r.trim_start_matches('#').to_owned());
    let scheme = el.get_attribute("scheme");
    let id = el.get_attribute("id");

    if let Some(property) = property.as_ref() {
        if property.split_whitespace().count() > 1 {
            model.meta_list_props.push(property.clone());
        }
    }
    if property.as_deref() == Some("") {
        model.meta_empty_props += 1;
    }

    let value = reader.get_element_text(el)?;
    if value.is_empty() {
        model.meta_empty_values += 1;
    }
    if property.as_deref() == Some("dcterms:modified") {
        model.metadata.modified_count += 1;
    }

    let property = property.unwrap_or_default();
    match refines {
        Some(refines) => pending_refines.push(RefiningMeta { property, value, refines, id, scheme }),
        None => model.primary_metas.push(PrimaryMeta { property, value, scheme, id, lang: el.get_attribute("xml:lang") }),
    }
    Ok(())
}

fn parse_dc_element(
    reader: &mut XmlReader,
    model: &mut PackageModel,
    el: &XmlStartElement,
    local: &str,
) -> ParserResult<()> {
    let id = el.get_attribute("id");
    let scheme = el.get_attribute("opf:scheme").or_else(|| el.get_attribute("scheme"));
    let role = el.get_attribute("opf:role").or_else(|| el.get_attribute("role"));
    let file_as = el.get_attribute("opf:file-as").or_else(|| el.get_attribute("file-as"));
    let lang = el.get_attribute("xml:lang");
    let value = reader.get_element_text(el)?;

    if let Some(id) = &id {
        model.metadata.dc_element_ids.push(id.clone());
        let kind = match local {
            "creator" => ElementKind::DcCreator,
            "contributor" => ElementKind::DcContributor,
            "title" => ElementKind::DcTitle,
            "identifier" => ElementKind::DcIdentifier,
            "source" => ElementKind::DcSource,
            "publisher" => ElementKind::DcPublisher,
            "subject" => ElementKind::DcSubject,
            _ => ElementKind::Other,
        };
        model.metadata.id_to_element_kind.insert(id.clone(), kind);
    }

    let entry = MetaText { value, id, scheme, role, file_as, lang };
    match local {
        "title" => model.metadata.titles.push(entry),
        "identifier" => model.metadata.identifiers.push(entry),
        "language" => model.metadata.languages.push(entry),
        "creator" => model.metadata.creators.push(entry),
        "contributor" => model.metadata.contributors.push(entry),
        "date" => model.metadata.dates.push(entry),
        "source" => model.metadata.sources.push(entry),
        "subject" => model.metadata.subjects.push(entry),
        "publisher" => model.metadata.publishers.push(entry),
        "description" => model.metadata.description.push(entry),
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------- manifest

fn parse_manifest(reader: &mut XmlReader, model: &mut PackageModel, container: &XmlStartElement) -> ParserResult<()> {
    if container.is_self_closing() {
        return Ok(());
    }
    loop {
        let Some(event) = reader.next() else { break };
        match event? {
            XmlEvent::Start(el) if el.is_local_name("item") => {
                record_common(model, &el);
                let id = AttrValue::from(el.get_attribute("id"));
                let href_raw = AttrValue::from(el.get_attribute("href"));
                let href = href_raw.as_str().map(|h| model.resolve_href(h));
                let media_type = AttrValue::from(el.get_attribute("media-type"));
                let properties = el
                    .get_attribute("properties")
                    .map(|p| p.split_whitespace().map(str::to_owned).collect())
                    .unwrap_or_default();

                model.manifest.push(ManifestItem {
                    id,
                    href_raw,
                    href,
                    media_type,
                    properties,
                    fallback: el.get_attribute("fallback"),
                    fallback_style: el.get_attribute("fallback-style"),
                    media_overlay: el.get_attribute("media-overlay"),
                });
                if !el.is_self_closing() {
                    reader.skip_element(&el)?;
                }
            }
            XmlEvent::Start(el) => {
                model.unknown_elements.push(el.local_name_str().into_owned());
                reader.skip_element(&el)?;
            }
            XmlEvent::End(name) if name == b"manifest" => break,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------- spine

fn parse_spine(reader: &mut XmlReader, model: &mut PackageModel, container: &XmlStartElement) -> ParserResult<()> {
    model.spine_toc = container.get_attribute("toc");
    model.spine_page_map = container.get_attribute("page-map");
    model.page_progression_direction = container.get_attribute("page-progression-direction");

    if container.is_self_closing() {
        return Ok(());
    }
    loop {
        let Some(event) = reader.next() else { break };
        match event? {
            XmlEvent::Start(el) if el.is_local_name("itemref") => {
                record_common(model, &el);
                let properties = el
                    .get_attribute("properties")
                    .map(|p| p.split_whitespace().map(str::to_owned).collect())
                    .unwrap_or_default();
                model.spine.push(SpineRef {
                    idref: AttrValue::from(el.get_attribute("idref")),
                    linear: el.get_attribute("linear"),
                    properties,
                    id: el.get_attribute("id"),
                });
                if !el.is_self_closing() {
                    reader.skip_element(&el)?;
                }
            }
            XmlEvent::Start(el) => {
                model.unknown_elements.push(el.local_name_str().into_owned());
                reader.skip_element(&el)?;
            }
            XmlEvent::End(name) if name == b"spine" => break,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------- guide

fn parse_guide(reader: &mut XmlReader, model: &mut PackageModel, container: &XmlStartElement) -> ParserResult<()> {
    if container.is_self_closing() {
        return Ok(());
    }
    loop {
        let Some(event) = reader.next() else { break };
        match event? {
            XmlEvent::Start(el) if el.is_local_name("reference") => {
                model.guide.push(GuideRef {
                    r#type: el.get_attribute("type"),
                    title: el.get_attribute("title"),
                    href: el.get_attribute("href"),
                });
                if !el.is_self_closing() {
                    reader.skip_element(&el)?;
                }
            }
            XmlEvent::Start(el) => {
                reader.skip_element(&el)?;
            }
            XmlEvent::End(name) if name == b"guide" => break,
            _ => {}
        }
    }
    Ok(())
}

// ------------------------------------------------------------ collections

fn parse_collection(
    reader: &mut XmlReader,
    model: &mut PackageModel,
    container: &XmlStartElement,
    top_level: bool,
) -> ParserResult<Collection> {
    let mut collection = Collection {
        role: container.get_attribute("role"),
        top_level,
        ..Default::default()
    };
    if container.is_self_closing() {
        return Ok(collection);
    }
    loop {
        let Some(event) = reader.next() else { break };
        match event? {
            XmlEvent::Start(el) if el.is_local_name("link") => {
                collection.links.push(MetadataLink {
                    href: el.get_attribute("href"),
                    rel: el.get_attribute("rel").map(|r| r.split_whitespace().map(str::to_owned).collect()).unwrap_or_default(),
                    media_type: el.get_attribute("media-type"),
                    hreflang: el.get_attribute("hreflang"),
                    properties: el.get_attribute("properties").map(|p| p.split_whitespace().map(str::to_owned).collect()).unwrap_or_default(),
                    refines: el.get_attribute("refines"),
                });
                if !el.is_self_closing() {
                    reader.skip_element(&el)?;
                }
            }
            XmlEvent::Start(el) if el.is_local_name("collection") => {
                let nested = parse_collection(reader, model, &el, false)?;
                collection.children.push(nested);
            }
            XmlEvent::Start(el) => {
                reader.skip_element(&el)?;
            }
            XmlEvent::End(name) if name == b"collection" => break,
            _ => {}
        }
    }
    Ok(collection)
}

/// Also accumulates package-level `<link>` elements (EPUB 3 metadata links)
/// encountered directly under `metadata` — the teacher never needed this,
/// the spec's `metadata_links` field does.
pub(crate) fn collect_metadata_links(model: &mut PackageModel, bytes: &[u8], strict: bool) -> ParserResult<()> {
    let mut reader = XmlReader::from_bytes(strict, bytes);
    let mut in_metadata = false;
    while let Some(event) = reader.next() {
        match event? {
            XmlEvent::Start(el) if el.is_local_name("metadata") => {
                in_metadata = true;
                if el.is_self_closing() {
                    in_metadata = false;
                }
            }
            XmlEvent::Start(el) if in_metadata && el.is_local_name("link") => {
                model.metadata_links.push(MetadataLink {
                    href: el.get_attribute("href"),
                    rel: el.get_attribute("rel").map(|r| r.split_whitespace().map(str::to_owned).collect()).unwrap_or_default(),
                    media_type: el.get_attribute("media-type"),
                    hreflang: el.get_attribute("hreflang"),
                    properties: el.get_attribute("properties").map(|p| p.split_whitespace().map(str::to_owned).collect()).unwrap_or_default(),
                    refines: el.get_attribute("refines"),
                });
            }
            XmlEvent::End(name) if name == b"metadata" => in_metadata = false,
            _ => {}
        }
    }
    Ok(())
}

#[allow(dead_code)]
pub(crate) type PendingIdCount = IndexMap<String, usize>;

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_OPF: &[u8] = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title id="t1">Sample Book</dc:title>
    <dc:identifier id="bookid">urn:isbn:000</dc:identifier>
    <dc:language>en</dc:language>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
  </metadata>
  <manifest>
    <item id="c1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
  </spine>
</package>"#;

    #[test]
    fn test_parse_minimal_package() {
        let model = parse(MINIMAL_OPF, "/OEBPS/content.opf".to_owned(), true).unwrap();
        assert_eq!(Some("3.0"), model.version.as_str());
        assert_eq!(1, model.metadata.titles.len());
        assert_eq!("Sample Book", model.metadata.titles[0].value);
        assert_eq!(2, model.manifest.len());
        assert_eq!(Some("/OEBPS/chapter1.xhtml"), model.manifest[0].href.as_deref());
        assert_eq!(1, model.spine.len());
        assert_eq!(1, model.metadata.modified_count);
    }

    #[test]
    fn test_duplicate_ids_survive() {
        let xml = br#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
          <manifest>
            <item id="x" href="a.xhtml" media-type="application/xhtml+xml"/>
            <item id="x" href="b.xhtml" media-type="application/xhtml+xml"/>
          </manifest>
        </package>"#;
        let model = parse(xml, "/content.opf".to_owned(), true).unwrap();
        assert_eq!(2, model.manifest.len());
        assert_eq!(Some(&2), model.xml_id_counts.get("x"));
    }

    #[test]
    fn test_missing_vs_empty_href() {
        let xml = br#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
          <manifest>
            <item id="a" media-type="application/xhtml+xml"/>
            <item id="b" href="" media-type="application/xhtml+xml"/>
          </manifest>
        </package>"#;
        let model = parse(xml, "/content.opf".to_owned(), true).unwrap();
        assert!(model.manifest[0].href_raw.is_missing());
        assert_eq!(AttrValue::Empty, model.manifest[1].href_raw);
    }

    #[test]
    fn test_refining_meta() {
        let xml = br#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
          <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
            <dc:creator id="c1">Jane Doe</dc:creator>
            <meta refines="#c1" property="role" scheme="marc:relators">aut</meta>
          </metadata>
        </package>"#;
        let model = parse(xml, "/content.opf".to_owned(), true).unwrap();
        assert_eq!(1, model.meta_refines.len());
        assert_eq!("c1", model.meta_refines[0].refines);
        assert_eq!("role", model.meta_refines[0].property);
    }
}
