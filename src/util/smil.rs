//! SMIL clock-value parsing, used by `media:duration` validation (`MED-*`).
//!
//! Grounded on the teacher's small, single-purpose `util` parsers
//! (`util/uri.rs`, `util/langtag.rs`): a pure function over `&str` returning
//! a normalized millisecond count, with no intermediate AST.

/// Parses a SMIL clock value (full-clock `hh:mm:ss(.fff)`, partial-clock
/// `mm:ss(.fff)`, or timecount `N(h|min|s|ms)`) into milliseconds.
pub(crate) fn parse_clock_value(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(millis) = parse_timecount(value) {
        return Some(millis);
    }

    let fields: Vec<&str> = value.split(':').collect();
    match fields.as_slice() {
        [h, m, s] => combine(h, m, s),
        [m, s] => combine("0", m, s),
        _ => None,
    }
}

fn combine(h: &str, m: &str, s: &str) -> Option<u64> {
    let hours: u64 = h.parse().ok()?;
    let minutes: u64 = m.parse().ok()?;
    let (sec_whole, millis) = split_seconds(s)?;
    Some(((hours * 60 + minutes) * 60 + sec_whole) * 1000 + millis)
}

fn split_seconds(s: &str) -> Option<(u64, u64)> {
    match s.split_once('.') {
        Some((whole, frac)) => {
            let whole: u64 = whole.parse().ok()?;
            let mut frac = frac.to_owned();
            frac.truncate(3);
            while frac.len() < 3 {
                frac.push('0');
            }
            Some((whole, frac.parse().ok()?))
        }
        None => Some((s.parse().ok()?, 0)),
    }
}

fn parse_timecount(value: &str) -> Option<u64> {
    let (number, unit) = value.find(|c: char| c.is_ascii_alphabetic()).map_or_else(
        || (value, ""),
        |index| (&value[..index], &value[index..]),
    );
    if unit.is_empty() {
        return None;
    }
    let amount: f64 = number.parse().ok()?;
    let millis_per_unit = match unit {
        "h" => 3_600_000.0,
        "min" => 60_000.0,
        "s" => 1_000.0,
        "ms" => 1.0,
        _ => return None,
    };
    Some((amount * millis_per_unit).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::parse_clock_value;

    #[test]
    fn test_full_clock() {
        assert_eq!(Some(3_723_456), parse_clock_value("01:02:03.456"));
        assert_eq!(Some(3_723_000), parse_clock_value("01:02:03"));
    }

    #[test]
    fn test_partial_clock() {
        assert_eq!(Some(62_500), parse_clock_value("01:02.5"));
        assert_eq!(Some(62_000), parse_clock_value("01:02"));
    }

    #[test]
    fn test_timecount() {
        assert_eq!(Some(1_500), parse_clock_value("1.5s"));
        assert_eq!(Some(3_600_000), parse_clock_value("1h"));
        assert_eq!(Some(60_000), parse_clock_value("1min"));
        assert_eq!(Some(250), parse_clock_value("250ms"));
    }

    #[test]
    fn test_invalid() {
        assert_eq!(None, parse_clock_value(""));
        assert_eq!(None, parse_clock_value("not-a-time"));
        assert_eq!(None, parse_clock_value("1:2:3:4"));
    }
}
