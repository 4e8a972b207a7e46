//! Small shared helpers: timestamps, request identifiers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as ISO-8601 UTC with millisecond precision,
/// e.g. `2026-02-23T12:00:00.000Z`. This is the canonical timestamp
/// format for every persisted record.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored ISO-8601 timestamp back into a `SystemTime` for
/// conditional-request comparisons. Returns `None` on malformed input.
pub fn parse_iso8601(ts: &str) -> Option<std::time::SystemTime> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).into())
}

/// Convert a stored ISO-8601 timestamp to an RFC 7231 date for the
/// `Last-Modified` header. Falls back to the current time if the stored
/// value does not parse.
pub fn iso8601_to_http_date(ts: &str) -> String {
    let t = parse_iso8601(ts).unwrap_or_else(std::time::SystemTime::now);
    httpdate::fmt_http_date(t)
}

/// Generate a 16-character uppercase hex request ID (`x-amz-request-id`).
pub fn request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode_upper(bytes)
}

/// Generate the opaque extended request ID (`x-amz-id-2`).
///
/// 30 random bytes base64-encode to 40 characters, the minimum length
/// AWS SDKs accept for this header.
pub fn extended_request_id() -> String {
    let bytes: [u8; 30] = rand::random();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso8601_shape() {
        let ts = now_iso8601();
        assert_eq!(ts.len(), "2026-02-23T12:00:00.000Z".len());
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn iso8601_round_trips_through_parse() {
        let ts = "2026-01-15T10:30:00.250Z";
        let t = parse_iso8601(ts).unwrap();
        let secs = t
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        assert_eq!(secs % 1000, 250);
    }

    #[test]
    fn parse_iso8601_rejects_garbage() {
        assert!(parse_iso8601("not-a-date").is_none());
        assert!(parse_iso8601("").is_none());
    }

    #[test]
    fn http_date_from_iso() {
        let s = iso8601_to_http_date("2026-01-15T10:30:00.000Z");
        assert!(s.contains("Jan 2026"));
        assert!(s.ends_with("GMT"));
    }

    #[test]
    fn request_id_is_16_upper_hex() {
        let id = request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_uppercase());
    }

    #[test]
    fn extended_request_id_is_40_chars() {
        assert_eq!(extended_request_id().len(), 40);
    }
}
