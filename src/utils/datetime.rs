use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Parses the timestamp shapes found in EXIF and client payloads. Values
/// without an offset are taken as UTC.
pub fn parse_datetime(dt_str: &str) -> Option<DateTime<Utc>> {
    let dt_str = dt_str.trim().trim_matches('"');

    if let Ok(dt) = DateTime::parse_from_rfc3339(dt_str) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y:%m:%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(dt_str, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    None
}

/// Storage form of a capture time. Fixed width so that text ordering in
/// SQLite matches chronological ordering.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
