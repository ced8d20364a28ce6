//! Allocation-free field extraction from raw log lines.
//!
//! The search prefilter rejects most lines on a handful of fields; going
//! through a full JSON parser for that costs roughly half the scan
//! throughput on big files, so selected values are pulled straight out of
//! the raw text instead. Lines the scanner cannot read are passed through
//! to the strict (decoded) phase rather than dropped.

use warden_dns_application::ports::{FilteringStatus, SearchCriteria, StringMatch};
use warden_dns_domain::FilterReason;

/// Find `"key":` at top level and return the byte offset just past the
/// colon. The needle includes the quotes, so a key can only false-match
/// inside a string value that itself contains a quoted JSON key, which is
/// rare enough that the strict phase covers it.
fn value_offset(line: &str, key: &str) -> Option<usize> {
    let mut needle = String::with_capacity(key.len() + 3);
    needle.push('"');
    needle.push_str(key);
    needle.push_str("\":");
    line.find(&needle).map(|pos| pos + needle.len())
}

/// Extract a string value. Returns `None` when the value is absent or
/// contains escapes (the strict phase handles those).
pub fn string_field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = value_offset(line, key)?;
    let rest = line.get(start..)?;
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    let value = &rest[..end];
    if value.contains('\\') {
        return None;
    }
    Some(value)
}

/// Extract a bare `true`/`false` value.
pub fn bool_field(line: &str, key: &str) -> Option<bool> {
    let start = value_offset(line, key)?;
    let rest = line.get(start..)?;
    if rest.starts_with("true") {
        Some(true)
    } else if rest.starts_with("false") {
        Some(false)
    } else {
        None
    }
}

/// Extract a bare integer value.
pub fn int_field(line: &str, key: &str) -> Option<i64> {
    let start = value_offset(line, key)?;
    let rest = line.get(start..)?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '-')
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// UNIX nanoseconds of the line's `T` field.
pub fn line_timestamp_ns(line: &str) -> Option<i64> {
    let raw = string_field(line, "T")?;
    let dt = chrono::DateTime::parse_from_rfc3339(raw).ok()?;
    dt.timestamp_nanos_opt()
}

/// Cheap reject pass over a raw line.
///
/// Returns `false` only when the line definitely cannot match; any field
/// the scanner fails to read keeps the line for the strict phase.
pub fn quick_matches(line: &str, criteria: &SearchCriteria) -> bool {
    if let Some(search) = &criteria.search {
        if let Some(qhost) = string_field(line, "QH") {
            if !prefilter_string(search, qhost) {
                return false;
            }
        }
    }
    if let Some(client) = &criteria.client {
        if let Some(ip) = string_field(line, "IP") {
            if !prefilter_string(client, ip) {
                return false;
            }
        }
    }
    if let Some(qtype) = criteria.qtype {
        if let Some(raw) = string_field(line, "QT") {
            if raw != qtype.to_string() {
                return false;
            }
        }
    }
    match criteria.status {
        FilteringStatus::All => {}
        FilteringStatus::Filtered => {
            if let Some(false) = bool_field(line, "IsFiltered") {
                return false;
            }
        }
        FilteringStatus::Processed => {
            if let Some(true) = bool_field(line, "IsFiltered") {
                return false;
            }
        }
        status => {
            if let Some(code) = int_field(line, "Reason") {
                match FilterReason::from_code(code as i32) {
                    Some(reason) if status.accepts(reason) => {}
                    _ => return false,
                }
            }
        }
    }
    true
}

fn prefilter_string(matcher: &StringMatch, raw: &str) -> bool {
    match matcher {
        // Exact matches still pass through as substring here; the strict
        // phase enforces equality.
        StringMatch::Substring(needle) | StringMatch::Exact(needle) => {
            raw.to_lowercase().contains(needle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_dns_domain::RecordType;

    const LINE: &str = r#"{"IP":"192.168.1.5","T":"2024-05-01T12:00:00.123456789Z","QH":"ads.example.org","QT":"A","QC":"IN","CP":"","Answer":"q80=","Result":{"IsFiltered":true,"Reason":3,"Rule":"||ads.example.org^","FilterID":2},"Elapsed":250000,"Upstream":"8.8.8.8:53"}"#;

    #[test]
    fn test_string_field() {
        assert_eq!(string_field(LINE, "QH"), Some("ads.example.org"));
        assert_eq!(string_field(LINE, "IP"), Some("192.168.1.5"));
        assert_eq!(string_field(LINE, "QT"), Some("A"));
        assert_eq!(string_field(LINE, "Missing"), None);
    }

    #[test]
    fn test_bool_and_int_fields() {
        assert_eq!(bool_field(LINE, "IsFiltered"), Some(true));
        assert_eq!(int_field(LINE, "Reason"), Some(3));
        assert_eq!(int_field(LINE, "Elapsed"), Some(250_000));
    }

    #[test]
    fn test_line_timestamp() {
        let ns = line_timestamp_ns(LINE).unwrap();
        let dt = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123456789Z").unwrap();
        assert_eq!(ns, dt.timestamp_nanos_opt().unwrap());
    }

    #[test]
    fn test_escaped_value_defers_to_strict_phase() {
        let line = r#"{"QH":"weird\"host","QT":"A"}"#;
        assert_eq!(string_field(line, "QH"), None);
    }

    #[test]
    fn test_quick_matches_domain() {
        let mut criteria = SearchCriteria::default();
        criteria.search = StringMatch::parse("ads.example");
        assert!(quick_matches(LINE, &criteria));

        criteria.search = StringMatch::parse("tracker");
        assert!(!quick_matches(LINE, &criteria));
    }

    #[test]
    fn test_quick_matches_qtype_and_status() {
        let mut criteria = SearchCriteria::default();
        criteria.qtype = Some(RecordType::AAAA);
        assert!(!quick_matches(LINE, &criteria));

        let mut criteria = SearchCriteria::default();
        criteria.status = FilteringStatus::Blocked;
        assert!(quick_matches(LINE, &criteria));

        criteria.status = FilteringStatus::BlockedParental;
        assert!(!quick_matches(LINE, &criteria));
    }
}
