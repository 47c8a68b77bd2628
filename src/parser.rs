//! XML parsing support shared by the container, package, and navigation
//! document parsers.
//!
//! Grounded on the teacher's `parser` module (`ebook::epub::parser` / `parser::xml`):
//! a pull-style, namespace-aware tokenizer wrapping `quick_xml`, generalized
//! here to also expose `input_offset()` (needed by `NAV-011`'s in-document
//! ordering) since the teacher never needed byte offsets for its own
//! read-only traversal.

pub(crate) mod package;
pub(crate) mod xml;

use std::error::Error;

/// Alias for `Result<T, XmlError>`.
pub(crate) type ParserResult<T> = Result<T, XmlError>;

/// Errors raised while tokenizing or walking an XML document.
///
/// Distinct from [`crate::engine::EngineError`]: a malformed document is
/// *not* a library failure, it is the reason a phase becomes fatal
/// (`RSC-005`/`RSC-016`/`NAV-011`) — callers of the rule engine never see
/// this type directly, only the `Diagnostic` it is turned into.
#[derive(thiserror::Error, Debug)]
pub(crate) enum XmlError {
    /// The underlying tokenizer rejected the byte stream.
    #[error(transparent)]
    Unparsable(#[from] Box<dyn Error + Send + Sync + 'static>),

    /// The document ended before a required closing tag was found.
    #[error("unexpected end of document")]
    UnexpectedEof,

    /// An element or attribute used a namespace prefix with no corresponding
    /// `xmlns:prefix` declaration in scope.
    #[error("unbound namespace prefix `{0}`")]
    UnboundPrefix(String),
}
