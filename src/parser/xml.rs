//! A small pull-style, namespace-aware wrapper around [`quick_xml`].
//!
//! Grounded on the teacher's `parser/xml.rs`, trimmed to the subset the rule
//! engine needs: element/attribute access in document order, consolidated
//! element text, and (the teacher never needed this) `input_offset()` so
//! `NAV-011` can re-tokenize a content document and record the byte offset
//! of each element's `id`, to compare same-document fragment-target order.

use crate::parser::{ParserResult, XmlError};
use crate::util::str::StringExt;
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;

pub(crate) enum XmlEvent {
    Start(XmlStartElement),
    /// The qualified name of the closed element.
    End(Vec<u8>),
    Text(String),
    Eof,
    /// Comments, processing instructions, declarations, doctypes.
    Skipped,
}

pub(crate) struct XmlReader<'a> {
    reader: quick_xml::Reader<&'a [u8]>,
    strict: bool,
}

impl<'a> XmlReader<'a> {
    pub(crate) fn from_bytes(strict: bool, data: &'a [u8]) -> Self {
        let mut reader = quick_xml::Reader::from_reader(data);
        reader.config_mut().trim_text(true);
        Self { reader, strict }
    }

    /// Byte offset into the original buffer just past the most recently
    /// returned token. Used by `NAV-011` to order same-document fragment
    /// targets.
    pub(crate) fn input_offset(&self) -> usize {
        self.reader.buffer_position() as usize
    }

    pub(crate) fn next(&mut self) -> Option<ParserResult<XmlEvent>> {
        match self.reader.read_event() {
            Ok(Event::Eof) => None,
            Ok(Event::Start(e)) => Some(Ok(XmlEvent::Start(XmlStartElement::new(e, false)))),
            Ok(Event::Empty(e)) => Some(Ok(XmlEvent::Start(XmlStartElement::new(e, true)))),
            Ok(Event::End(e)) => Some(Ok(XmlEvent::End(e.name().as_ref().to_vec()))),
            Ok(Event::Text(text)) => Some(decode_text(&text, self.strict)),
            Ok(Event::CData(cdata)) => Some(
                cdata
                    .decode()
                    .map(|decoded| XmlEvent::Text(decoded.trim().to_owned()))
                    .map_err(|e| XmlError::Unparsable(Box::new(e))),
            ),
            Ok(_) => Some(Ok(XmlEvent::Skipped)),
            Err(error) if self.strict => Some(Err(XmlError::Unparsable(Box::new(error)))),
            // Best-effort: a single malformed token ends the document rather
            // than looping forever on the same parse error.
            Err(_) => None,
        }
    }

    /// Consolidates all text (and nested markup, flattened) until the
    /// matching end tag of `start` is reached.
    pub(crate) fn get_element_text(&mut self, start: &XmlStartElement) -> ParserResult<String> {
        if start.is_self_closing {
            return Ok(String::new());
        }
        let target = start.name().to_vec();
        let mut depth = 0usize;
        let mut value = String::new();

        while let Some(event) = self.next() {
            match event? {
                XmlEvent::Start(el) if el.name() == target => depth += 1,
                XmlEvent::Start(_) => {}
                XmlEvent::End(name) if name == target && depth == 0 => break,
                XmlEvent::End(name) if name == target => depth -= 1,
                XmlEvent::Text(text) => {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(text.trim());
                }
                _ => {}
            }
        }
        value.trim_in_place();
        Ok(value)
    }

    /// Skips to, and consumes, the end tag matching `start` without
    /// collecting text (used when only attributes of an element matter).
    pub(crate) fn skip_element(&mut self, start: &XmlStartElement) -> ParserResult<()> {
        if start.is_self_closing {
            return Ok(());
        }
        let target = start.name().to_vec();
        let mut depth = 0usize;
        while let Some(event) = self.next() {
            match event? {
                XmlEvent::Start(el) if el.name() == target => depth += 1,
                XmlEvent::End(name) if name == target && depth == 0 => return Ok(()),
                XmlEvent::End(name) if name == target => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }
}

fn decode_text(text: &quick_xml::events::BytesText<'_>, strict: bool) -> ParserResult<XmlEvent> {
    match text.unescape() {
        Ok(decoded) => Ok(XmlEvent::Text(decoded.into_owned())),
        Err(_) if !strict => Ok(XmlEvent::Text(String::from_utf8_lossy(text.as_ref()).into_owned())),
        Err(error) => Err(XmlError::Unparsable(Box::new(error))),
    }
}

pub(crate) struct XmlStartElement {
    element: BytesStart<'static>,
    is_self_closing: bool,
}

impl XmlStartElement {
    fn new(element: BytesStart<'_>, is_self_closing: bool) -> Self {
        Self { element: element.into_owned(), is_self_closing }
    }

    /// Full qualified name, e.g. `b"dc:title"`.
    pub(crate) fn name(&self) -> &[u8] {
        self.element.name().as_ref()
    }

    pub(crate) fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name())
    }

    /// Name with any namespace prefix stripped, e.g. `b"title"`.
    pub(crate) fn local_name(&self) -> &[u8] {
        self.element.local_name().into_inner()
    }

    pub(crate) fn local_name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.local_name())
    }

    /// The namespace prefix of this element's name, if any (e.g. `"dc"` for
    /// `dc:title`).
    pub(crate) fn prefix(&self) -> Option<&str> {
        let name = std::str::from_utf8(self.name()).ok()?;
        name.split_once(':').map(|(prefix, _)| prefix)
    }

    pub(crate) fn is_local_name(&self, target: impl AsRef<[u8]>) -> bool {
        self.local_name() == target.as_ref()
    }

    pub(crate) fn is_self_closing(&self) -> bool {
        self.is_self_closing
    }

    pub(crate) fn get_attribute(&self, key: impl AsRef<[u8]>) -> Option<String> {
        self.element
            .try_get_attribute(key)
            .ok()
            .flatten()
            .and_then(|attr| attr.decode_and_unescape_value(self.element.decoder()).ok())
            .map(|cow| cow.into_owned())
    }

    pub(crate) fn has_attribute(&self, key: impl AsRef<[u8]>) -> bool {
        self.element.try_get_attribute(key).ok().flatten().is_some()
    }

    /// All attributes, in document order, as `(qualified-name, value)`
    /// pairs. Attribute order matters for a handful of rules that must
    /// detect which of two mutually exclusive attributes came first.
    pub(crate) fn attributes_ordered(&self) -> Vec<(String, String)> {
        self.element
            .attributes()
            .filter_map(|result| result.ok())
            .filter_map(|attr| {
                let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr
                    .decode_and_unescape_value(self.element.decoder())
                    .ok()?
                    .into_owned();
                Some((name, value))
            })
            .collect()
    }
}
