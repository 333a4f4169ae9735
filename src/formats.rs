//! String format detection
//!
//! Recognizes the string shapes that matter for discovery: document
//! identifiers (24-hex object ids and UUIDs) and ISO dates / date-times.
//! Cheap length and byte checks run before any regex.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
});

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

static OBJECT_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").unwrap());

static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

/// Shape of a string value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    /// 24-hex object id or UUID
    Identifier,
    Date,
    DateTime,
}

/// Detect the format of a string value, if it has one we care about
pub fn detect_format(value: &str) -> Option<StringFormat> {
    let len = value.len();
    if len == 0 {
        return None;
    }
    let bytes = value.as_bytes();

    if len == 24 && OBJECT_ID_REGEX.is_match(value) {
        return Some(StringFormat::Identifier);
    }

    if len == 36 && bytes[8] == b'-' && UUID_REGEX.is_match(value) {
        return Some(StringFormat::Identifier);
    }

    if len == 10 && bytes[4] == b'-' && bytes[7] == b'-' && ISO_DATE_REGEX.is_match(value) {
        return Some(StringFormat::Date);
    }

    if len >= 19
        && (bytes[10] == b'T' || bytes[10] == b' ')
        && ISO_DATETIME_REGEX.is_match(value)
    {
        return Some(StringFormat::DateTime);
    }

    None
}

/// True when the string looks like a document identifier
pub fn is_identifier(value: &str) -> bool {
    detect_format(value) == Some(StringFormat::Identifier)
}

/// Parse a date or date-time string into UTC
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) and date-only
/// strings (midnight UTC).
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, pattern) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_identifier_formats() {
        assert_eq!(detect_format("5f1d7c2e9b1e8a3d4c5b6a79"), Some(StringFormat::Identifier));
        assert_eq!(
            detect_format("550e8400-e29b-41d4-a716-446655440000"),
            Some(StringFormat::Identifier)
        );
        assert_eq!(detect_format("5f1d7c2e9b1e8a3d4c5b6a7"), None);
        assert!(!is_identifier("hello world"));
    }

    #[test]
    fn test_date_formats() {
        assert_eq!(detect_format("2024-01-15"), Some(StringFormat::Date));
        assert_eq!(detect_format("2024-01-15T10:30:00Z"), Some(StringFormat::DateTime));
        assert_eq!(detect_format("2024-01-15 10:30:00"), Some(StringFormat::DateTime));
        assert_eq!(detect_format("2024/01/15"), None);
    }

    #[test]
    fn test_parse_datetime() {
        let parsed = parse_datetime("2024-03-05T08:09:10+02:00").unwrap();
        assert_eq!(parsed.hour(), 6);

        let parsed = parse_datetime("2024-03-05").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2024, 3, 5));
        assert_eq!(parsed.hour(), 0);

        assert!(parse_datetime("not a date").is_none());
    }
}
