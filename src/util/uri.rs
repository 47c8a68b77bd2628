use std::borrow::Cow;

pub const SEPARATOR: char = '/';
const SEPARATOR_STR: &str = "/";
const CURRENT_DIR: &str = ".";
const PARENT_DIR: &str = "..";
const EMPTY: &str = "";

/// Resolver to turn relative hrefs into container-absolute paths.
///
/// Grounded on the teacher's `UriResolver` (`ebook::epub::parser`), generalized
/// to the spec's `resolve_href` operation: combine the OPF directory and an
/// href into a `path.Clean`-equivalent absolute path, with no percent-decoding
/// (percent-decoding is a separate, rule-specific concern — see `uri::decode`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct UriResolver<'a>(&'a str);

impl<'a> UriResolver<'a> {
    pub(crate) fn parent_of(absolute_path: &'a str) -> Self {
        Self(parent(absolute_path))
    }

    pub(crate) fn resolve(&self, href: &str) -> String {
        resolve(self.0, href).into_owned()
    }
}

pub(crate) fn into_absolute(mut path: String) -> String {
    if !path.starts_with(SEPARATOR) {
        path.insert(0, SEPARATOR);
    }
    path
}

pub(crate) fn parent(href: &str) -> &str {
    href.rfind(SEPARATOR).map_or(EMPTY, |index| {
        if index == 0 { SEPARATOR_STR } else { &href[..index] }
    })
}

/// Strips a trailing `#fragment` and/or `?query` component.
pub(crate) fn path(href: &str) -> &str {
    href.find(['#', '?']).map_or(href, |index| &href[..index])
}

/// The `#fragment` of an href, without the leading `#`.
pub(crate) fn fragment(href: &str) -> Option<&str> {
    href.find('#').map(|index| &href[index + 1..])
}

pub(crate) fn filename(href: &str) -> &str {
    path(href)
        .rsplit(SEPARATOR)
        .next()
        .expect("`rsplit` guarantees at least one entry")
}

/// Whether `href` is a remote URL the validator must not resolve against the archive.
pub(crate) fn is_remote(href: &str) -> bool {
    href.len() >= 7 && href[..7].eq_ignore_ascii_case("http://") || href.len() >= 8 && href[..8].eq_ignore_ascii_case("https://")
}

pub(crate) fn is_file_url(href: &str) -> bool {
    href.starts_with("file:")
}

pub(crate) fn is_data_url(href: &str) -> bool {
    href.starts_with("data:")
}

pub(crate) fn has_query(href: &str) -> bool {
    path(href).len() != href.len() && href[path(href).len()..].starts_with('?')
}

/// Whether `href` traverses above its starting directory via `..`.
pub(crate) fn has_parent_traversal(href: &str) -> bool {
    path(href).split(SEPARATOR).any(|c| c == PARENT_DIR)
}

// This given href is assumed to be well-formed.
pub(crate) fn has_scheme(href: &str) -> bool {
    // The scheme must be ASCII
    let ascii = href.as_bytes();

    // Check if a colon exists
    let Some(colon_pos) = ascii.iter().position(|&c| c == b':') else {
        return false;
    };

    // The first byte must be an ASCII letter
    if !ascii[0].is_ascii_alphabetic() {
        return false;
    }

    ascii[1..colon_pos]
        .iter()
        // Return early if invalid characters are encountered
        .all(|c| c.is_ascii_alphanumeric() || matches!(*c, b'+' | b'.' | b'-'))
}

/// A minimal "does this parse as a URL" check for collection `role` values
/// (`OPF-070`): a scheme followed by non-empty content is accepted without
/// validating the rest of the URL grammar.
pub(crate) fn parse_url_role(role: &str) -> Option<()> {
    has_scheme(role).then_some(())
}

pub(crate) fn decode(encoded: &str) -> Cow<'_, str> {
    percent_encoding::percent_decode_str(encoded).decode_utf8_lossy()
}

/// Resolve a child path against its parent, normalizing if necessary.
pub(crate) fn resolve<'a>(parent_dir: &str, relative: &'a str) -> Cow<'a, str> {
    let (main_href, ext) = relative
        .find(['?', '#'])
        .map_or((relative, EMPTY), |position| {
            (&relative[..position], &relative[position..])
        });

    if main_href.starts_with(SEPARATOR) || has_scheme(main_href) {
        // If the path is absolute or has a scheme,
        // it is most likely resolved already.
        return Cow::Borrowed(relative);
    }

    let resolved_href = String::from(parent_dir) + SEPARATOR_STR + main_href + ext;

    Cow::Owned(normalize(&resolved_href).into_owned())
}

pub(crate) fn normalize(original: &str) -> Cow<'_, str> {
    // First check if normalization is required
    let mut components = original.split(SEPARATOR);
    // If absolute (`/a/b/c`), the first split is always empty.
    if original.starts_with(SEPARATOR) {
        components.next();
    }
    // Normalization is not required if the following are not found:
    // "."  => Current dir
    // ".." => Parent dir
    // ""   => Empty component (e.g., double slashes)
    if !components.any(|c| matches!(c, EMPTY | CURRENT_DIR | PARENT_DIR)) {
        return Cow::Borrowed(original);
    }

    // Normalize
    let mut stack = Vec::new();

    for component in original.split(SEPARATOR) {
        match component {
            EMPTY | CURRENT_DIR => {}
            PARENT_DIR => {
                stack.pop();
            }
            _ => stack.push(component),
        }
    }

    // Calculate `capacity` to avoid reallocations when appending to `path`
    let capacity = stack.iter().map(|s| s.len()).sum::<usize>() + stack.len();
    let mut path = String::with_capacity(capacity);
    let mut components = stack.into_iter();

    // Re-add the root directory if there was one originally
    if original.starts_with(SEPARATOR) {
        path.push(SEPARATOR);
    }
    if let Some(component) = components.next() {
        path.push_str(component);
    }
    for component in components {
        path.push(SEPARATOR);
        path.push_str(component);
    }
    Cow::Owned(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_href() {
        #[rustfmt::skip]
        let expected = [
            ("OPS/content/toc", "OPS/content/toc/toc.xhtml?q=1#start"),
            ("OPS/content", "OPS/content/toc"),
            ("OPS/content", "OPS/content/c1.xhtml"),
            ("OPS", "OPS/c5.xhtml?q=1"),
            ("", "OPS"),
            ("/", "/OPS"),
            ("/", "/"),
            ("", ""),
        ];

        for (expect_href, href) in expected {
            assert_eq!(expect_href, parent(href));
        }
    }

    #[test]
    fn test_as_absolute_href() {
        #[rustfmt::skip]
        let expected = [
            ("/c3.xhtml", "OPS/content", "/c3.xhtml"),
            ("content/c3.xhtml", "./content", "c3.xhtml"),
            ("OPS/content/toc/toc.xhtml", "OPS/content/toc", "toc.xhtml"),
            ("OPS/content/toc/toc.xhtml", "OPS/content/toc", "./toc.xhtml",),
            ("OPS/content/c1.xhtml", "OPS/content/toc", "../c1.xhtml"),
            ("OPS/c1.xhtml?q=1", "OPS/content/toc", "../../c1.xhtml?q=1"),
            ("c1.xhtml#part-2", "OPS/content/toc", "../../../c1.xhtml#part-2"),
        ];

        for (expect_href, absolute_dir, relative_href) in expected {
            assert_eq!(expect_href, resolve(absolute_dir, relative_href));
        }
    }

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("https://ab.c"));
        assert!(has_scheme("mailto:a@b.c"));
        assert!(has_scheme("a:link"));
        assert!(!has_scheme("1https://ab.c"));
        assert!(!has_scheme(":abc"));
        assert!(!has_scheme(""));
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("http://example.com/a.xhtml"));
        assert!(is_remote("https://example.com/a.xhtml"));
        assert!(!is_remote("a.xhtml"));
        assert!(!is_remote("file:///a.xhtml"));
    }

    #[test]
    fn test_has_parent_traversal() {
        assert!(has_parent_traversal("../a.xhtml"));
        assert!(has_parent_traversal("a/../../b.xhtml"));
        assert!(!has_parent_traversal("a/b.xhtml"));
    }
}
