//! Storage eligibility of a completed response.

/// Requests under this prefix are presumed to be static build assets and are
/// cacheable without the marker header.
pub const BUILD_ASSET_PREFIX: &str = "/build/";

/// The marker header value that opts a response into storage.
pub const MARKER_VALUE: &str = "true";

/// Returns `true` iff the response may be stored.
///
/// Only `200` responses qualify, and only when the upstream marked them with
/// the cacheable header or the request path is a build asset.
///
/// ```
/// use emergency_cache::cache::is_cacheable;
///
/// assert!(is_cacheable("/build/app.js", 200, ""));
/// assert!(!is_cacheable("/other", 200, ""));
/// assert!(is_cacheable("/other", 200, "true"));
/// assert!(!is_cacheable("/other", 404, "true"));
/// ```
pub fn is_cacheable(request_path: &str, response_status: u16, marker_value: &str) -> bool {
    response_status == 200
        && (marker_value == MARKER_VALUE || request_path.starts_with(BUILD_ASSET_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_assets_need_no_marker() {
        assert!(is_cacheable("/build/app.js", 200, ""));
        assert!(is_cacheable("/build/", 200, "false"));
        assert!(!is_cacheable("/build", 200, ""));
        assert!(!is_cacheable("/assets/build/app.js", 200, ""));
    }

    #[test]
    fn marker_must_be_exactly_true() {
        assert!(is_cacheable("/page", 200, "true"));
        assert!(!is_cacheable("/page", 200, "TRUE"));
        assert!(!is_cacheable("/page", 200, "1"));
    }

    #[test]
    fn only_ok_is_cacheable() {
        for status in [201, 204, 301, 304, 404, 500] {
            assert!(!is_cacheable("/build/app.js", status, "true"), "{status}");
        }
    }
}
