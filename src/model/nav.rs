//! The EPUB 3 Navigation Document Model (§3, §4.9): the `toc`, `landmarks`,
//! and `page-list` navigation lists of `nav.xhtml`.
//!
//! Grounded on the same pull-tokenizer walk the teacher uses for the
//! container and package documents, narrowed to the handful of `nav`
//! elements the spec's NAV-phase rules read: each `<nav>`'s `epub:type`,
//! its single child `<ol>`, and the `<a>`/`<span>` entries inside it.

use crate::parser::xml::{XmlEvent, XmlReader};
use crate::parser::ParserResult;

/// One entry in a `toc`, `landmarks`, or `page-list` nav: an `<a href="...">`
/// (or an unlinked `<span>`, tracked only as present/absent of an href).
#[derive(Clone, Debug, Default)]
pub(crate) struct NavLink {
    pub(crate) href: Option<String>,
    pub(crate) text: String,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct NavModel {
    pub(crate) toc_links: Vec<NavLink>,
    pub(crate) landmark_links: Vec<NavLink>,
    pub(crate) page_list_links: Vec<NavLink>,

    /// `epub:type` values seen on `<nav>` elements, in document order.
    pub(crate) nav_types: Vec<String>,
    /// `epub:type` values seen on `landmarks` `<li><a>` entries.
    pub(crate) landmark_types: Vec<String>,

    pub(crate) toc_count: usize,
    pub(crate) toc_has_ol: bool,
    pub(crate) has_hidden_nav: bool,
    pub(crate) has_landmarks: bool,
    pub(crate) has_page_list: bool,
}

impl NavModel {
    pub(crate) fn parse(bytes: &[u8], strict: bool) -> ParserResult<Self> {
        let mut reader = XmlReader::from_bytes(strict, bytes);
        let mut model = NavModel::default();

        while let Some(event) = reader.next() {
            let XmlEvent::Start(el) = event? else { continue };
            if !el.is_local_name("nav") {
                continue;
            }

            let nav_type = el.get_attribute("epub:type").unwrap_or_default();
            model.nav_types.push(nav_type.clone());
            let hidden = el.has_attribute("hidden");

            match nav_type.as_str() {
                "toc" => {
                    model.toc_count += 1;
                    if hidden {
                        model.has_hidden_nav = true;
                    }
                    if !el.is_self_closing() {
                        parse_nav_body(&mut reader, &mut model.toc_links, &mut model.toc_has_ol, &el)?;
                    }
                }
                "landmarks" => {
                    model.has_landmarks = true;
                    let mut has_ol = false;
                    if !el.is_self_closing() {
                        parse_landmarks_body(&mut reader, &mut model, &el, &mut has_ol)?;
                    }
                }
                "page-list" => {
                    model.has_page_list = true;
                    let mut has_ol = false;
                    if !el.is_self_closing() {
                        parse_nav_body(&mut reader, &mut model.page_list_links, &mut has_ol, &el)?;
                    }
                }
                _ => {
                    if !el.is_self_closing() {
                        reader.skip_element(&el)?;
                    }
                }
            }
        }
        Ok(model)
    }
}

fn parse_nav_body(
    reader: &mut XmlReader,
    links: &mut Vec<NavLink>,
    has_ol: &mut bool,
    nav_el: &crate::parser::xml::XmlStartElement,
) -> ParserResult<()> {
    let target = nav_el.name().to_vec();
    let mut depth = 0usize;

    while let Some(event) = reader.next() {
        match event? {
            XmlEvent::Start(el) if el.is_local_name("ol") => *has_ol = true,
            XmlEvent::Start(el) if el.is_local_name("a") => {
                let href = el.get_attribute("href");
                let text = reader.get_element_text(&el)?;
                links.push(NavLink { href, text });
            }
            XmlEvent::Start(el) if target.as_slice() == el.name() => depth += 1,
            XmlEvent::End(name) if name == target && depth == 0 => break,
            XmlEvent::End(name) if name == target => depth -= 1,
            _ => {}
        }
    }
    Ok(())
}

fn parse_landmarks_body(
    reader: &mut XmlReader,
    model: &mut NavModel,
    nav_el: &crate::parser::xml::XmlStartElement,
    has_ol: &mut bool,
) -> ParserResult<()> {
    let target = nav_el.name().to_vec();
    let mut depth = 0usize;

    while let Some(event) = reader.next() {
        match event? {
            XmlEvent::Start(el) if el.is_local_name("ol") => *has_ol = true,
            XmlEvent::Start(el) if el.is_local_name("a") => {
                let href = el.get_attribute("href");
                let epub_type = el.get_attribute("epub:type").unwrap_or_default();
                model.landmark_types.push(epub_type);
                let text = reader.get_element_text(&el)?;
                model.landmark_links.push(NavLink { href, text });
            }
            XmlEvent::Start(el) if target.as_slice() == el.name() => depth += 1,
            XmlEvent::End(name) if name == target && depth == 0 => break,
            XmlEvent::End(name) if name == target => depth -= 1,
            _ => {}
        }
    }
    Ok(())
}
