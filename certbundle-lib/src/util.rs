//! Shared encoding and matching utilities.

use crate::oid;
use base64::Engine;

/// Format bytes as contiguous uppercase hex (e.g., "ABCDEF").
pub fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Encode bytes as base64 with PEM-style 64-character line wrapping.
pub fn base64_wrap(data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    // Base64 output is always valid ASCII, so we can chunk the string directly.
    let num_lines = encoded.len().div_ceil(64);
    let mut result = String::with_capacity(encoded.len() + num_lines);
    let mut pos = 0;
    while pos < encoded.len() {
        if pos > 0 {
            result.push('\n');
        }
        let end = (pos + 64).min(encoded.len());
        result.push_str(&encoded[pos..end]);
        pos = end;
    }
    result
}

/// Wrap DER certificate bytes in PEM armor.
pub fn pem_encode_certificate(der: &[u8]) -> String {
    format!(
        "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
        base64_wrap(der)
    )
}

/// Detect whether input bytes are PEM-encoded.
///
/// Returns `true` if the input starts with `-----BEGIN` (after stripping
/// leading whitespace).
pub fn is_pem(input: &[u8]) -> bool {
    input
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take(10)
        .eq(b"-----BEGIN".iter())
}

/// Map common OID dotted-decimal strings to their short name equivalents.
///
/// These match the names used by OpenSSL for distinguished name components.
pub fn oid_short_name(oid: &str) -> String {
    match oid {
        oid::COMMON_NAME => "CN".into(),
        oid::SURNAME => "SN".into(),
        oid::SERIAL_NUMBER => "serialNumber".into(),
        oid::COUNTRY => "C".into(),
        oid::LOCALITY => "L".into(),
        oid::STATE_OR_PROVINCE => "ST".into(),
        oid::STREET_ADDRESS => "street".into(),
        oid::ORGANIZATION => "O".into(),
        oid::ORGANIZATIONAL_UNIT => "OU".into(),
        oid::TITLE => "title".into(),
        oid::POSTAL_CODE => "postalCode".into(),
        oid::GIVEN_NAME => "GN".into(),
        oid::EMAIL_ADDRESS => "emailAddress".into(),
        oid::DOMAIN_COMPONENT => "DC".into(),
        other => other.to_string(),
    }
}

/// RFC 6125 hostname matching with wildcard support.
///
/// Checks for exact match or wildcard match (e.g., `*.example.com` matches
/// `sub.example.com` but not `deep.sub.example.com` or `example.com`).
pub fn hostname_matches(pattern: &str, hostname: &str) -> bool {
    let pattern_lower = pattern.to_ascii_lowercase();
    let hostname_lower = hostname.to_ascii_lowercase();

    if pattern_lower == hostname_lower {
        return true;
    }

    // Wildcard matching: *.example.com
    if let Some(suffix) = pattern_lower.strip_prefix("*.") {
        if let Some(rest) = hostname_lower.strip_suffix(suffix) {
            // rest should be "label." (a single label followed by a dot)
            if let Some(label) = rest.strip_suffix('.') {
                if !label.is_empty() && !label.contains('.') {
                    return true;
                }
            }
        }
    }

    false
}

/// The last path segment of a URL, used to name stashed intermediates.
///
/// Query strings and fragments are stripped first so
/// `http://ca.example.com/int.der?x=1` yields `int.der`.
pub fn url_basename(url: &str) -> String {
    let trimmed = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// Build a stash file name from a certificate's common name: whitespace and
/// dots removed, `.crt` appended.
pub fn sanitized_cn_filename(common_name: &str) -> String {
    let mut name: String = common_name
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect();
    name.push_str(".crt");
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_upper_formats() {
        assert_eq!(hex_upper(&[0xab, 0x01, 0xff]), "AB01FF");
        assert_eq!(hex_upper(&[]), "");
    }

    #[test]
    fn pem_armor_wraps_at_64() {
        let pem = pem_encode_certificate(&[0u8; 96]);
        let lines: Vec<&str> = pem.lines().collect();
        assert_eq!(lines[0], "-----BEGIN CERTIFICATE-----");
        assert_eq!(lines[1].len(), 64);
        assert_eq!(*lines.last().unwrap(), "-----END CERTIFICATE-----");
    }

    #[test]
    fn hostname_exact_and_wildcard() {
        assert!(hostname_matches("example.com", "EXAMPLE.com"));
        assert!(hostname_matches("*.example.com", "sub.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("*.example.com", "deep.sub.example.com"));
        assert!(!hostname_matches("*.", "x."));
    }

    #[test]
    fn url_basename_strips_query_and_slash() {
        assert_eq!(url_basename("http://ca.example.com/certs/int.der"), "int.der");
        assert_eq!(url_basename("http://ca.example.com/int.der?fmt=der"), "int.der");
        assert_eq!(url_basename("http://ca.example.com/certs/"), "certs");
    }

    #[test]
    fn cn_sanitization_drops_dots_and_spaces() {
        assert_eq!(
            sanitized_cn_filename("Example Trust CA 2.0"),
            "ExampleTrustCA20.crt"
        );
        assert_eq!(sanitized_cn_filename(""), ".crt");
    }
}
