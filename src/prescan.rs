//! Encoding & Namespace Pre-Scan (§4.3): byte-level checks that must run
//! before the OPF is handed to the XML tokenizer, because a UTF-16 document
//! cannot be consumed by a UTF-8-only tokenizer and an undeclared namespace
//! prefix cannot be detected by the tokenizer at all.
//!
//! Grounded on the teacher's `util::utf` BOM-sniffing helper (since removed
//! — it assumed UTF-16-to-UTF-8 recovery, which this validator does not
//! attempt: a non-UTF-8 OPF is a diagnosis, not something to silently fix up)
//! and its own regex dependency, which the teacher's `Cargo.toml` already
//! carried for slug/filter matching elsewhere in the reading-library surface.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PrescanOutcome {
    Accepted,
    RejectedUtf32,
    RejectedLatin1,
    RejectedUnknown,
    RejectedConflict,
}

#[derive(Debug, Default)]
pub(crate) struct PrescanResult {
    pub(crate) outcome: Option<PrescanOutcome>,
    /// Set when the encoding was non-fatal but still worth a warning
    /// (UTF-16 declared and matching the BOM).
    pub(crate) utf16_warning: bool,
    pub(crate) doctype_public_id: Option<String>,
    pub(crate) undeclared_prefix: Option<String>,
}

const ALLOWED_DOCTYPE_PUBLIC_IDS: &[&str] = &[
    "-//W3C//DTD XHTML 1.1//EN",
    "-//W3C//DTD XHTML 1.0 Strict//EN",
    "-//W3C//DTD XHTML 1.0 Transitional//EN",
    "+//ISBN 0-9673008-1-9//DTD OEB 1.2 Package//EN",
    "+//ISBN 0-9673008-1-9//DTD OEB 1.2 Document//EN",
];

pub(crate) fn run(bytes: &[u8]) -> PrescanResult {
    let mut result = PrescanResult::default();

    if let Some(outcome) = classify_bom(bytes, &mut result) {
        result.outcome = Some(outcome);
        if outcome != PrescanOutcome::Accepted {
            return result;
        }
    }

    if result.outcome.is_none() {
        result.outcome = Some(classify_declaration(bytes));
    }

    if matches!(result.outcome, Some(PrescanOutcome::Accepted)) {
        result.doctype_public_id = extract_doctype_public_id(bytes);
        result.undeclared_prefix = find_undeclared_prefix(bytes);
        if result.undeclared_prefix.is_some() {
            result.outcome = Some(PrescanOutcome::RejectedConflict);
        }
    }
    result
}

/// BOM inspection (§4.3 bullet 1). `Some(Accepted)` with `utf16_warning` set
/// means a UTF-16 BOM was found and its declared encoding matched.
fn classify_bom(bytes: &[u8], result: &mut PrescanResult) -> Option<PrescanOutcome> {
    if bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        return Some(PrescanOutcome::RejectedUtf32);
    }
    if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        return Some(PrescanOutcome::RejectedUtf32);
    }
    if bytes.starts_with(&[0x00, 0x00, 0x00, 0x3C]) {
        return Some(PrescanOutcome::RejectedUtf32);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        return Some(classify_utf16(bytes, result));
    }
    if bytes.starts_with(&[0x00, 0x3C]) || bytes.starts_with(&[0x3C, 0x00]) {
        return Some(classify_utf16(bytes, result));
    }
    None
}

/// Samples every other byte of the first ~200 bytes to pull the ASCII
/// encoding declaration out of a UTF-16 prolog.
fn classify_utf16(bytes: &[u8], result: &mut PrescanResult) -> PrescanOutcome {
    let big_endian = bytes.starts_with(&[0xFE, 0xFF]) || bytes.starts_with(&[0x00, 0x3C]);
    let sample_start = if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) { 2 } else { 0 };
    let window = &bytes[sample_start..bytes.len().min(sample_start + 200)];

    let ascii_bytes: Vec<u8> = if big_endian {
        window.iter().skip(1).step_by(2).copied().collect()
    } else {
        window.iter().step_by(2).copied().collect()
    };
    let prolog = String::from_utf8_lossy(&ascii_bytes);

    match extract_encoding_attr(&prolog) {
        Some(enc) if enc.eq_ignore_ascii_case("utf-16") => {
            result.utf16_warning = true;
            PrescanOutcome::Accepted
        }
        Some(_) => PrescanOutcome::RejectedConflict,
        None => {
            result.utf16_warning = true;
            PrescanOutcome::Accepted
        }
    }
}

/// Parses the ASCII-readable prolog's `encoding=` attribute and classifies
/// it (§4.3 bullet 3).
fn classify_declaration(bytes: &[u8]) -> PrescanOutcome {
    let prolog_len = bytes.len().min(512);
    let prolog = String::from_utf8_lossy(&bytes[..prolog_len]);

    match extract_encoding_attr(&prolog) {
        None => PrescanOutcome::Accepted,
        Some(enc) => {
            let enc = enc.to_ascii_lowercase();
            match enc.as_str() {
                "utf-8" => PrescanOutcome::Accepted,
                "utf-16" => PrescanOutcome::Accepted,
                "iso-8859-1" | "latin1" | "latin-1" => PrescanOutcome::RejectedLatin1,
                "utf-32" | "ucs-4" => PrescanOutcome::RejectedUtf32,
                _ => PrescanOutcome::RejectedUnknown,
            }
        }
    }
}

fn encoding_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"encoding\s*=\s*["']([^"']+)["']"#).expect("valid regex"))
}

fn extract_encoding_attr(prolog: &str) -> Option<String> {
    encoding_attr_regex().captures(prolog).map(|c| c[1].to_owned())
}

fn doctype_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<!DOCTYPE[^>]*PUBLIC\s+["']([^"']+)["']"#).expect("valid regex"))
}

fn extract_doctype_public_id(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    doctype_regex().captures(&text).map(|c| c[1].to_owned())
}

pub(crate) fn is_allowed_doctype_public_id(public_id: &str) -> bool {
    ALLOWED_DOCTYPE_PUBLIC_IDS.contains(&public_id)
}

/// Regex-sweeps the raw bytes for `<prefix:` openings whose `prefix` was
/// never bound by an earlier `xmlns:prefix=` (§4.3 bullet 4, §9 "Undeclared-
/// prefix detection cannot rely on the tokenizer").
fn find_undeclared_prefix(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let tag_open = tag_open_regex();
    let xmlns_decl = xmlns_decl_regex();

    let mut declared: Vec<String> = vec!["xml".to_owned(), "xmlns".to_owned()];
    let mut offenders = Vec::new();

    // Two passes: first collect every xmlns:prefix= declaration regardless
    // of position (attribute order within a start tag doesn't constrain
    // where in the *document* a prefix may first be declared — the inner
    // `package`/`html` root commonly declares all prefixes its descendants
    // use), then check every prefixed element/attribute name against it.
    for capture in xmlns_decl.captures_iter(&text) {
        declared.push(capture[1].to_owned());
    }

    for capture in tag_open.captures_iter(&text) {
        let prefix = &capture[1];
        if !declared.iter().any(|d| d == prefix) && !offenders.iter().any(|o: &String| o == prefix) {
            offenders.push(prefix.to_owned());
        }
    }
    offenders.into_iter().next()
}

fn tag_open_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"</?([A-Za-z][\w.-]*):[A-Za-z_][\w.-]*"#).expect("valid regex"))
}

fn xmlns_decl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"xmlns:([A-Za-z_][\w.-]*)\s*="#).expect("valid regex"))
}
