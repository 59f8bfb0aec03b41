//! Path normalization and URL assembly.
//!
//! Request paths and route path patterns go through the same normalization
//! before they are compared: percent-escapes of unreserved characters are
//! decoded, every other escape is preserved with uppercase hex digits. This
//! keeps `%2F` distinct from `/` while making `/caf%65` and `/cafe` equal,
//! and it is idempotent, so a request re-entering the engine through a
//! loopback routes identically.

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

// RFC 3986 unreserved: ALPHA / DIGIT / "-" / "." / "_" / "~"
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// Normalizes a request path per RFC 3986 while preserving the raw form of
/// reserved characters.
///
/// Unreserved escapes are decoded (`%41` becomes `A`), reserved escapes are
/// kept with their hex digits uppercased (`%2f` becomes `%2F`), and invalid
/// escape sequences pass through untouched.
pub fn normalize_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(high), Some(low)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = high * 16 + low;
                if is_unreserved(decoded) {
                    out.push(decoded);
                } else {
                    out.push(b'%');
                    out.push(HEX_UPPER[high as usize]);
                    out.push(HEX_UPPER[low as usize]);
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out)
        .unwrap_or_else(|e| String::from_utf8_lossy(&e.into_bytes()).into_owned())
}

/// Fully percent-decodes a string. Used for captured path parameters and
/// query values, never for path comparison.
pub fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(high), Some(low)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(high * 16 + low);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out)
        .unwrap_or_else(|e| String::from_utf8_lossy(&e.into_bytes()).into_owned())
}

/// Assembles the upstream request URL from an endpoint base URL, the current
/// request path, and the raw query string.
pub fn build_upstream_url(base: &str, path: &str, query: &str) -> String {
    let base = base.trim_end_matches('/');
    if query.is_empty() {
        format!("{}{}", base, path)
    } else {
        format!("{}{}?{}", base, path, query)
    }
}

/// Splits a normalized path into its segments. The root path has no
/// segments; a trailing slash yields a final empty segment so `/a` and `/a/`
/// stay distinct.
pub fn split_segments(path: &str) -> Vec<&str> {
    if path == "/" || path.is_empty() {
        return Vec::new();
    }
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreserved_escapes_are_decoded() {
        assert_eq!(normalize_path("/caf%65"), "/cafe");
        assert_eq!(normalize_path("/%41%42"), "/AB");
        assert_eq!(normalize_path("/%7Euser"), "/~user");
    }

    #[test]
    fn reserved_escapes_are_preserved_uppercase() {
        assert_eq!(normalize_path("/a%2fb"), "/a%2Fb");
        assert_eq!(normalize_path("/a%2Fb"), "/a%2Fb");
        assert_eq!(normalize_path("/q%3Fx"), "/q%3Fx");
    }

    #[test]
    fn normalization_is_idempotent() {
        for p in ["/a%2fb", "/caf%65", "/plain", "/%zz", "/%2"] {
            let once = normalize_path(p);
            assert_eq!(normalize_path(&once), once);
        }
    }

    #[test]
    fn invalid_escapes_pass_through() {
        assert_eq!(normalize_path("/%zz"), "/%zz");
        assert_eq!(normalize_path("/100%"), "/100%");
    }

    #[test]
    fn percent_decode_decodes_everything() {
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        assert_eq!(percent_decode("jo%20do"), "jo do");
    }

    #[test]
    fn upstream_urls_include_query_only_when_present() {
        assert_eq!(
            build_upstream_url("http://b:8080", "/x", ""),
            "http://b:8080/x"
        );
        assert_eq!(
            build_upstream_url("http://b:8080", "/x", "a=1"),
            "http://b:8080/x?a=1"
        );
    }

    #[test]
    fn segment_splitting_keeps_trailing_slash_distinct() {
        assert!(split_segments("/").is_empty());
        assert_eq!(split_segments("/a/b"), vec!["a", "b"]);
        assert_eq!(split_segments("/a/"), vec!["a", ""]);
    }
}
