//! S3 input validation.
//!
//! Naming and parameter rules enforced before any state change, independent
//! of the HTTP layer so they can be unit-tested in isolation.

use crate::errors::S3Error;

/// Maximum UTF-8 byte length of an object key.
const MAX_KEY_BYTES: usize = 1024;

/// Upper bound (and default) for the `max-keys` family of parameters.
const MAX_MAX_KEYS: u32 = 1000;

/// Validate an S3 bucket name against AWS naming rules.
///
/// - 3–63 characters, lowercase letters, digits, hyphens, periods
/// - must start and end with a letter or digit
/// - must not be formatted as an IPv4 address
/// - must not start with `xn--`, nor end with `-s3alias` or `--ol-s3`
/// - no `..` substring
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let invalid = || S3Error::InvalidBucketName {
        name: name.to_string(),
    };

    let bytes = name.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return Err(invalid());
    }

    let is_edge = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_edge(bytes[0]) || !is_edge(bytes[bytes.len() - 1]) {
        return Err(invalid());
    }
    if !bytes
        .iter()
        .all(|&b| is_edge(b) || b == b'-' || b == b'.')
    {
        return Err(invalid());
    }

    if looks_like_ipv4(name) {
        return Err(invalid());
    }
    if name.starts_with("xn--") {
        return Err(invalid());
    }
    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return Err(invalid());
    }
    if name.contains("..") {
        return Err(invalid());
    }

    Ok(())
}

/// Validate an object key: UTF-8 byte length must not exceed 1024.
pub fn validate_object_key(key: &str) -> Result<(), S3Error> {
    if key.len() > MAX_KEY_BYTES {
        return Err(S3Error::KeyTooLongError);
    }
    Ok(())
}

/// Parse and validate a `max-keys`-style query parameter.
///
/// Absent means the default of 1000; anything that is not an integer in
/// `[0, 1000]` is `InvalidArgument`.
pub fn parse_max_keys(raw: Option<&str>, param: &str) -> Result<u32, S3Error> {
    let raw = match raw {
        Some(v) => v,
        None => return Ok(MAX_MAX_KEYS),
    };
    let bad = || S3Error::InvalidArgument {
        message: format!("Argument {param} must be an integer between 0 and {MAX_MAX_KEYS}"),
    };
    let n: i64 = raw.parse().map_err(|_| bad())?;
    if !(0..=MAX_MAX_KEYS as i64).contains(&n) {
        return Err(bad());
    }
    Ok(n as u32)
}

/// Dotted-quad check. Only a full four-octet numeric form disqualifies a
/// bucket name; `999.1.1.1` style values fail the u8 parse and pass.
fn looks_like_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| !p.is_empty() && p.parse::<u8>().is_ok())
}
