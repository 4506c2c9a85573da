//! Cache key derivation.
//!
//! Keys are a literal concatenation of host, path and raw query. Nothing is
//! normalized: `?a=1&b=2` and `?b=2&a=1` are different entries, as are
//! `/x` and `/x/`.

use crate::http::Request;

/// Derives the cache key for a request target.
///
/// Returns `host + path`, followed by `"?" + raw_query` when `include_query`
/// is set and the query is non-empty.
///
/// ```
/// use emergency_cache::cache::derive_key;
///
/// assert_eq!(derive_key("a.com", "/x", "q=1", true), "a.com/x?q=1");
/// assert_eq!(derive_key("a.com", "/x", "q=1", false), "a.com/x");
/// assert_eq!(derive_key("a.com", "/x", "", true), "a.com/x");
/// ```
pub fn derive_key(host: &str, path: &str, raw_query: &str, include_query: bool) -> String {
    let mut key = String::with_capacity(host.len() + path.len() + raw_query.len() + 1);
    key.push_str(host);
    key.push_str(path);
    if include_query && !raw_query.is_empty() {
        key.push('?');
        key.push_str(raw_query);
    }
    key
}

/// The two lookup keys of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKeys {
    /// Host + path + query. Used for every write and for the first lookup.
    pub full: String,
    /// Host + path. Only consulted as an emergency fallback.
    pub stripped: String,
}

impl RequestKeys {
    pub fn for_request(request: &Request) -> Self {
        let host = request.host();
        let path = request.path();
        let query = request.query_string().unwrap_or_default();
        Self {
            full: derive_key(host, path, query, true),
            stripped: derive_key(host, path, query, false),
        }
    }

    /// `true` when the stripped key names a different entry than the full key.
    pub fn has_fallback(&self) -> bool {
        self.full != self.stripped
    }
}
