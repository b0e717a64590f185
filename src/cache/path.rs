//! Mapping of application ids and URIs onto store paths.
//!
//! ```text
//! https://ex/app/js/main.js?v=3
//!   └─► {root}/app/js/main.js/_q1f0c3a9b2d4e6f80/_entries/{entry}
//! ```
//!
//! Path segments are escaped injectively, so two different URI paths never
//! share a lookup path. Entries below one lookup path may still belong to
//! different hosts; the cache matches them by their stored URI.

use sha2::{Digest, Sha256};
use url::Url;

use crate::constants::{ENTRIES_NODE, MAX_SEGMENT_LEN};
use crate::error::CacheError;

/// Number of hex digits kept from a SHA-256 digest.
const HASH_PREFIX_LEN: usize = 16;

/// Returns the first hex digits of the SHA-256 digest of `input`.
pub fn hash_prefix(input: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest.truncate(HASH_PREFIX_LEN);
    digest
}

/// Escapes one path segment.
///
/// ASCII letters, digits, `.` and `-` are kept; every other byte of the
/// UTF-8 encoding (including `_`) becomes `_xx`.
///
/// # Errors
///
/// Returns the reason if the segment is empty, `.` or `..`, or longer than
/// the maximum segment length once escaped.
///
/// # Examples
///
/// ```
/// use respipe::cache::path::escape_segment;
///
/// assert_eq!(escape_segment("main.js").unwrap(), "main.js");
/// assert_eq!(escape_segment("a_b c").unwrap(), "a_5fb_20c");
/// assert!(escape_segment("..").is_err());
/// ```
pub fn escape_segment(segment: &str) -> Result<String, String> {
    match segment {
        "" => return Err("empty path segment".to_string()),
        "." | ".." => return Err(format!("relative path segment '{segment}'")),
        _ => {},
    }

    let mut escaped = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            escaped.push(char::from(byte));
        } else {
            escaped.push('_');
            escaped.push_str(&hex::encode([byte]));
        }
    }

    if escaped.len() > MAX_SEGMENT_LEN {
        return Err(format!(
            "segment is {} bytes once escaped, limit is {MAX_SEGMENT_LEN}",
            escaped.len()
        ));
    }
    Ok(escaped)
}

/// Builds the cache root path for an application.
///
/// `{app}` in `template` is replaced by the escaped application id.
///
/// # Errors
///
/// [`CacheError::InvalidPath`] if the application id cannot be escaped.
///
/// ```
/// use respipe::cache::path::cache_root;
///
/// let root = cache_root("/var/app-integration/{app}/files", "shop_1").unwrap();
/// assert_eq!(root, "/var/app-integration/shop_5f1/files");
/// ```
pub fn cache_root(template: &str, application_id: &str) -> Result<String, CacheError> {
    let app = escape_segment(application_id).map_err(|reason| CacheError::InvalidPath {
        uri: application_id.to_string(),
        reason,
    })?;
    Ok(template.replace("{app}", &app))
}

/// Returns the node under which the entries for `uri` are stored.
///
/// # Errors
///
/// [`CacheError::InvalidPath`] if a path segment is `.`/`..` or too long.
pub fn lookup_path(root: &str, uri: &Url) -> Result<String, CacheError> {
    let mut path = root.trim_end_matches('/').to_string();
    for segment in uri.path().split('/').filter(|s| !s.is_empty()) {
        let escaped = escape_segment(segment).map_err(|reason| CacheError::InvalidPath {
            uri: uri.to_string(),
            reason,
        })?;
        path.push('/');
        path.push_str(&escaped);
    }
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        path.push_str("/_q");
        path.push_str(&hash_prefix(query));
    }
    path.push('/');
    path.push_str(ENTRIES_NODE);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn lookup_path_splits_uri_path() {
        assert_eq!(
            lookup_path("/root", &url("https://ex/app/js/main.js")).unwrap(),
            "/root/app/js/main.js/_entries"
        );
        assert_eq!(
            lookup_path("/root/", &url("https://ex/")).unwrap(),
            "/root/_entries"
        );
    }

    #[test]
    fn query_adds_hashed_segment() {
        let a = lookup_path("/r", &url("https://ex/a.js?v=1")).unwrap();
        let b = lookup_path("/r", &url("https://ex/a.js?v=2")).unwrap();
        let plain = lookup_path("/r", &url("https://ex/a.js")).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("/r/a.js/_q"));
        assert_eq!(lookup_path("/r", &url("https://ex/a.js?")).unwrap(), plain);
    }

    #[test]
    fn escaping_is_injective_for_underscore() {
        // a literal "_20" must not collide with an escaped space
        let literal = escape_segment("_20").unwrap();
        let space = escape_segment(" ").unwrap();
        assert_ne!(literal, space);
        assert_eq!(space, "_20");
        assert_eq!(literal, "_5f20");
    }

    #[test]
    fn escaped_query_segment_cannot_collide_with_path() {
        let query = lookup_path("/r", &url("https://ex/a?x=1")).unwrap();
        let hash = query.trim_start_matches("/r/a/").trim_end_matches("/_entries");
        let crafted = format!("https://ex/a/{hash}");
        assert_ne!(lookup_path("/r", &url(&crafted)).unwrap(), query);
    }

    #[test]
    fn non_ascii_is_escaped_per_byte() {
        assert_eq!(escape_segment("é").unwrap(), "_c3_a9");
    }

    #[test]
    fn overlong_segment_is_rejected() {
        let long = "a".repeat(MAX_SEGMENT_LEN + 1);
        let err = lookup_path("/r", &url(&format!("https://ex/{long}"))).unwrap_err();
        assert!(matches!(err, CacheError::InvalidPath { .. }));
        assert!(escape_segment(&"a".repeat(MAX_SEGMENT_LEN)).is_ok());
    }

    #[test]
    fn hash_prefix_is_stable() {
        assert_eq!(hash_prefix("abc"), "ba7816bf8f01cfea");
        assert_eq!(hash_prefix("abc").len(), 16);
    }
}
