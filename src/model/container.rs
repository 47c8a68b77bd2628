//! The OCF Container Model: `META-INF/container.xml`.
//!
//! Grounded on the teacher's `ebook::epub::parser::container` (same pull-tokenizer
//! walk over `rootfile` elements), generalized from "return the first OPF
//! location" to the spec's full rootfile/link inventory plus a content-model
//! walk so the OCF phase can flag unexpected elements (`RSC-005`).

use crate::parser::xml::{XmlEvent, XmlReader};
use crate::parser::ParserResult;

const ALLOWED_ELEMENTS: &[&str] = &["container", "rootfiles", "rootfile", "links", "link"];
const OEBPS_PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// One `<rootfile>` entry, before the engine has chosen the primary.
#[derive(Clone, Debug, Default)]
pub(crate) struct RootFile {
    pub(crate) full_path: Option<String>,
    pub(crate) full_path_present: bool,
    pub(crate) media_type: Option<String>,
}

impl RootFile {
    /// Distinct `Missing` vs `Empty` for `OPF-016`/`OPF-017`.
    pub(crate) fn has_empty_full_path(&self) -> bool {
        self.full_path_present && self.full_path.as_deref() == Some("")
    }

    pub(crate) fn has_missing_full_path(&self) -> bool {
        !self.full_path_present
    }
}

/// A container-level `<link>` (e.g. to a metadata record).
#[derive(Clone, Debug)]
pub(crate) struct ContainerLink {
    pub(crate) href: Option<String>,
    pub(crate) rel: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ContainerModel {
    pub(crate) version: Option<String>,
    pub(crate) rootfiles: Vec<RootFile>,
    pub(crate) links: Vec<ContainerLink>,
    /// Elements encountered outside `ALLOWED_ELEMENTS`; surfaced so the OCF
    /// phase can emit one `RSC-005` per offender.
    pub(crate) unknown_elements: Vec<String>,
}

impl ContainerModel {
    /// Index into `rootfiles` of the primary rootfile, per the spec's chosen
    /// resolution: the first whose media-type equals
    /// `application/oebps-package+xml`, or the first overall if none match
    /// (§9 Open Question (a) — resolved in `DESIGN.md`).
    pub(crate) fn primary_index(&self) -> Option<usize> {
        self.rootfiles
            .iter()
            .position(|r| r.media_type.as_deref() == Some(OEBPS_PACKAGE_MEDIA_TYPE))
            .or(if self.rootfiles.is_empty() { None } else { Some(0) })
    }

    pub(crate) fn primary(&self) -> Option<&RootFile> {
        self.primary_index().map(|i| &self.rootfiles[i])
    }

    pub(crate) fn opf_rootfile_count(&self) -> usize {
        self.rootfiles
            .iter()
            .filter(|r| r.media_type.as_deref() == Some(OEBPS_PACKAGE_MEDIA_TYPE))
            .count()
    }

    pub(crate) fn parse(bytes: &[u8]) -> ParserResult<Self> {
        let mut reader = XmlReader::from_bytes(false, bytes);
        let mut model = ContainerModel::default();

        while let Some(event) = reader.next() {
            let XmlEvent::Start(el) = event? else { continue };
            let local = el.local_name_str().into_owned();

            if !ALLOWED_ELEMENTS.contains(&local.as_str()) {
                model.unknown_elements.push(local.clone());
            }

            match local.as_str() {
                "container" => {
                    model.version = el.get_attribute("version");
                }
                "rootfile" => {
                    model.rootfiles.push(RootFile {
                        full_path_present: el.has_attribute("full-path"),
                        full_path: el.get_attribute("full-path"),
                        media_type: el.get_attribute("media-type"),
                    });
                }
                "link" => {
                    model.links.push(ContainerLink {
                        href: el.get_attribute("href"),
                        rel: el.get_attribute("rel"),
                    });
                }
                _ => {}
            }
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::ContainerModel;

    const MINIMAL: &[u8] = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    #[test]
    fn test_parses_primary_rootfile() {
        let model = ContainerModel::parse(MINIMAL).unwrap();
        assert_eq!(Some("1.0"), model.version.as_deref());
        let primary = model.primary().unwrap();
        assert_eq!(Some("OEBPS/content.opf"), primary.full_path.as_deref());
    }

    #[test]
    fn test_missing_vs_empty_full_path() {
        let missing = br#"<container><rootfiles><rootfile media-type="x"/></rootfiles></container>"#;
        let model = ContainerModel::parse(missing).unwrap();
        assert!(model.rootfiles[0].has_missing_full_path());

        let empty = br#"<container><rootfiles><rootfile full-path="" media-type="x"/></rootfiles></container>"#;
        let model = ContainerModel::parse(empty).unwrap();
        assert!(model.rootfiles[0].has_empty_full_path());
    }

    #[test]
    fn test_primary_falls_back_to_first() {
        let xml = br#"<container><rootfiles>
            <rootfile full-path="a.opf" media-type="text/xml"/>
            <rootfile full-path="b.opf" media-type="text/xml"/>
        </rootfiles></container>"#;
        let model = ContainerModel::parse(xml).unwrap();
        assert_eq!(Some("a.opf"), model.primary().unwrap().full_path.as_deref());
    }

    #[test]
    fn test_unknown_element_recorded() {
        let xml = br#"<container><bogus/></container>"#;
        let model = ContainerModel::parse(xml).unwrap();
        assert_eq!(vec!["bogus".to_string()], model.unknown_elements);
    }
}
