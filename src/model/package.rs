//! The OPF Package Model (§3): the central entity every OPF-phase,
//! cross-reference-phase, and navigation-phase rule reads from.
//!
//! Grounded on the shape of the teacher's `ebook::epub::package`/`manifest`/
//! `metadata`/`spine` model structs, generalized in the ways §3 calls for:
//! duplicates are never collapsed (`Vec`, not a deduplicating map), optional
//! attributes keep the `AttrValue` tri-state, and auxiliary parser state
//! (`xml_id_counts`, `element_order`, ...) that the teacher's read-only model
//! never needed is carried alongside the "clean" fields because later rules
//! depend on it.

use crate::model::attr::AttrValue;
use crate::util::uri::UriResolver;
use indexmap::IndexMap;

/// What kind of metadata element an id belongs to, for refinement-target
/// resolution (§4.7 "Refinement semantics").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ElementKind {
    ManifestItem,
    DcCreator,
    DcContributor,
    DcTitle,
    DcIdentifier,
    DcSource,
    DcPublisher,
    DcSubject,
    Meta,
    Other,
}

/// A single Dublin Core-ish metadata text entry (title, creator, language, ...).
#[derive(Clone, Debug, Default)]
pub(crate) struct MetaText {
    pub(crate) value: String,
    pub(crate) id: Option<String>,
    pub(crate) scheme: Option<String>,
    pub(crate) role: Option<String>,
    pub(crate) file_as: Option<String>,
    pub(crate) lang: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MetadataModel {
    pub(crate) titles: Vec<MetaText>,
    pub(crate) identifiers: Vec<MetaText>,
    pub(crate) languages: Vec<MetaText>,
    pub(crate) creators: Vec<MetaText>,
    pub(crate) contributors: Vec<MetaText>,
    pub(crate) dates: Vec<MetaText>,
    pub(crate) sources: Vec<MetaText>,
    pub(crate) subjects: Vec<MetaText>,
    pub(crate) publishers: Vec<MetaText>,
    pub(crate) description: Vec<MetaText>,
    /// Occurrences of `meta[property=dcterms:modified]`.
    pub(crate) modified_count: usize,
    pub(crate) dc_element_ids: Vec<String>,
    pub(crate) id_to_element_kind: IndexMap<String, ElementKind>,
}

/// A non-refining `meta` property element (EPUB 3).
#[derive(Clone, Debug)]
pub(crate) struct PrimaryMeta {
    pub(crate) property: String,
    pub(crate) value: String,
    pub(crate) scheme: Option<String>,
    pub(crate) id: Option<String>,
    pub(crate) lang: Option<String>,
}

/// A refining `meta` property element (EPUB 3), `refines` stripped of its
/// leading `#`.
#[derive(Clone, Debug)]
pub(crate) struct RefiningMeta {
    pub(crate) property: String,
    pub(crate) value: String,
    pub(crate) refines: String,
    pub(crate) id: Option<String>,
    pub(crate) scheme: Option<String>,
}

/// Sentinel used where the spec calls for `"\x00MISSING"`: a required
/// attribute that was never present at all (as opposed to present-but-empty,
/// which is `AttrValue::Empty` and survives as `""`).
pub(crate) const MISSING_SENTINEL: &str = "\x00MISSING";

#[derive(Clone, Debug, Default)]
pub(crate) struct ManifestItem {
    pub(crate) id: AttrValue,
    /// href as written in the document (not yet resolved against the OPF directory).
    pub(crate) href_raw: AttrValue,
    /// href resolved to a container-absolute path via `resolve_href`.
    pub(crate) href: Option<String>,
    pub(crate) media_type: AttrValue,
    pub(crate) properties: Vec<String>,
    pub(crate) fallback: Option<String>,
    pub(crate) fallback_style: Option<String>,
    pub(crate) media_overlay: Option<String>,
}

impl ManifestItem {
    pub(crate) fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct SpineRef {
    pub(crate) idref: AttrValue,
    pub(crate) linear: Option<String>,
    pub(crate) properties: Vec<String>,
    pub(crate) id: Option<String>,
}

impl SpineRef {
    pub(crate) fn is_linear(&self) -> bool {
        !matches!(self.linear.as_deref(), Some("no"))
    }

    pub(crate) fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct GuideRef {
    pub(crate) r#type: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) href: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Collection {
    pub(crate) role: Option<String>,
    pub(crate) top_level: bool,
    pub(crate) links: Vec<MetadataLink>,
    pub(crate) children: Vec<Collection>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MetadataLink {
    pub(crate) href: Option<String>,
    pub(crate) rel: Vec<String>,
    pub(crate) media_type: Option<String>,
    pub(crate) hreflang: Option<String>,
    pub(crate) properties: Vec<String>,
    pub(crate) refines: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PackageModel {
    pub(crate) location: String,
    pub(crate) version: AttrValue,
    pub(crate) unique_identifier_ref: Option<String>,
    pub(crate) prefix_decl: Option<String>,
    pub(crate) dir: Option<String>,
    pub(crate) page_progression_direction: Option<String>,

    pub(crate) metadata: MetadataModel,
    pub(crate) primary_metas: Vec<PrimaryMeta>,
    pub(crate) meta_refines: Vec<RefiningMeta>,

    pub(crate) manifest: Vec<ManifestItem>,
    pub(crate) spine: Vec<SpineRef>,
    pub(crate) spine_toc: Option<String>,
    pub(crate) spine_page_map: Option<String>,

    pub(crate) guide: Vec<GuideRef>,
    pub(crate) has_guide: bool,

    pub(crate) collections: Vec<Collection>,
    pub(crate) metadata_links: Vec<MetadataLink>,

    // Ancillary parser state, §3.
    pub(crate) meta_empty_values: usize,
    pub(crate) meta_empty_props: usize,
    pub(crate) meta_list_props: Vec<String>,
    pub(crate) xml_id_counts: IndexMap<String, usize>,
    pub(crate) element_order: Vec<String>,
    pub(crate) unknown_elements: Vec<String>,
    pub(crate) has_metadata: bool,
    pub(crate) has_manifest: bool,
    pub(crate) has_spine: bool,
    pub(crate) all_xml_langs: Vec<String>,

    /// Legacy OEBPS 1.2 dialect detected via the `openebook.org` namespace.
    pub(crate) is_legacy_oeb1: bool,
    /// Set when schema-skeleton errors already reported a cascade that later
    /// rules must not duplicate (§7 suppression policy).
    pub(crate) default_namespace_wrong: bool,
}

impl PackageModel {
    pub(crate) fn opf_directory(&self) -> &str {
        crate::util::uri::parent(&self.location)
    }

    /// §3 invariant 3: combines the OPF directory and an href into a
    /// container-absolute path (`path.Clean`-equivalent, no percent-decoding).
    pub(crate) fn resolve_href(&self, href: &str) -> String {
        UriResolver::parent_of(&self.location).resolve(href)
    }

    pub(crate) fn manifest_by_id(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id.as_str() == Some(id))
    }

    pub(crate) fn manifest_by_href(&self, href: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.href.as_deref() == Some(href))
    }

    pub(crate) fn is_epub3(&self) -> bool {
        self.version.as_str() == Some("3.0")
    }

    pub(crate) fn is_epub2(&self) -> bool {
        self.version.as_str() == Some("2.0")
    }

    pub(crate) fn unique_identifier_value(&self) -> Option<&str> {
        let id_ref = self.unique_identifier_ref.as_deref()?;
        self.metadata
            .identifiers
            .iter()
            .find(|ident| ident.id.as_deref() == Some(id_ref))
            .map(|ident| ident.value.as_str())
    }
}
