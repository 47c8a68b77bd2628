//! Approximate BCP 47 language-tag validation.
//!
//! Grounded on the teacher's `util/str.rs` byte-level string helpers; the
//! grammar itself is the approximation given by §6 of the spec:
//! `^[A-Za-z]{2,3}(-[A-Za-z0-9]{1,8})*$`.

/// Whether `tag` matches the approximate BCP 47 grammar used for `xml:lang`
/// and `dc:language` validation (`OPF-003`, `OPF-092`).
pub(crate) fn is_valid(tag: &str) -> bool {
    let mut parts = tag.split('-');

    let Some(primary) = parts.next() else {
        return false;
    };
    if !(2..=3).contains(&primary.len()) || !primary.bytes().all(|b| b.is_ascii_alphabetic()) {
        return false;
    }

    for subtag in parts {
        if !(1..=8).contains(&subtag.len()) || !subtag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::is_valid;

    #[test]
    fn test_valid_tags() {
        for tag in ["en", "en-US", "fr", "zho", "pt-BR", "zh-Hans-CN", "de-1996"] {
            assert!(is_valid(tag), "{tag} should be valid");
        }
    }

    #[test]
    fn test_invalid_tags() {
        for tag in ["", "e", "english", "en--US", "en_US", "123"] {
            assert!(!is_valid(tag), "{tag} should be invalid");
        }
    }
}
