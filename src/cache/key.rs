//! Cache key derivation and the reserved control parameters.
//!
//! A key is the request URI with the control parameters removed, optionally
//! with its query pairs sorted by name, reduced to URL-safe characters.

use std::borrow::Cow;

use url::form_urlencoded;

use crate::Request;

/// Query parameter requesting deletion of the entry after the response is sent.
pub const DELETE_PARAM: &str = "cache_delete";

/// Query parameter requesting deletion of the entry before the request is served.
pub const FORCE_DELETE_PARAM: &str = "cache_force_delete";

/// Query parameter requesting a recomputed, unstored response.
pub const REFRESH_PARAM: &str = "cache_refresh";

/// Every reserved control parameter. None of them ever reach a cache key.
pub const CONTROL_PARAMS: [&str; 3] = [DELETE_PARAM, FORCE_DELETE_PARAM, REFRESH_PARAM];

// Punctuation kept by `sanitize` in addition to ASCII alphanumerics.
const URL_SAFE_PUNCTUATION: &str = "$-_.+!*'(),{}|\\^~[]`<>#%\";/?:@&=";

/// Permissive boolean parsing for control parameters.
///
/// After trimming and lowercasing, `""`, `0`, `false`, `no` and `off` are
/// false; every other value is true.
///
/// ```
/// use restash::cache::key::parse_flag;
///
/// assert!(parse_flag("1"));
/// assert!(parse_flag("TRUE"));
/// assert!(parse_flag("whatever"));
/// assert!(!parse_flag(" False "));
/// assert!(!parse_flag(""));
/// ```
pub fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// The control flags carried by a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags {
    pub delete: bool,
    pub force_delete: bool,
    pub refresh: bool,
}

impl ControlFlags {
    /// Reads the flags from the request's query. When a flag repeats, the
    /// last value wins.
    pub fn from_request(request: &Request) -> Self {
        let flag = |name: &str| request.query_params_all(name).last().is_some_and(parse_flag);
        Self {
            delete: flag(DELETE_PARAM),
            force_delete: flag(FORCE_DELETE_PARAM),
            refresh: flag(REFRESH_PARAM),
        }
    }
}

/// Returns `true` if `name` is one of the reserved control parameters.
pub fn is_control_param(name: &str) -> bool {
    CONTROL_PARAMS.contains(&name)
}

// Raw query pairs paired with their decoded names, control parameters removed.
fn residual_pairs(query: &str) -> Vec<(Cow<'_, str>, &str)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let raw_name = pair.split_once('=').map_or(pair, |(name, _)| name);
            let name = form_urlencoded::parse(raw_name.as_bytes())
                .next()
                .map_or(Cow::Borrowed(raw_name), |(name, _)| name);
            (!is_control_param(&name)).then_some((name, pair))
        })
        .collect()
}

/// Removes the control parameters from a raw query string, leaving every
/// other pair byte-for-byte as it was. Returns `None` when nothing is left.
///
/// ```
/// use restash::cache::key::strip_control_params;
///
/// assert_eq!(
///     strip_control_params("page=2&cache_refresh=1&q=a%20b").as_deref(),
///     Some("page=2&q=a%20b")
/// );
/// assert_eq!(strip_control_params("cache_delete=true"), None);
/// ```
pub fn strip_control_params(query: &str) -> Option<String> {
    let pairs: Vec<&str> = residual_pairs(query)
        .into_iter()
        .map(|(_, raw)| raw)
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("&"))
}

/// The request URI with control parameters removed.
///
/// With `sort_query_params`, the remaining pairs are stably sorted by
/// decoded name, so `?b=1&a=2` and `?a=2&b=1` share a key while repeated
/// values of one name keep their order.
pub fn residual_uri(request: &Request, sort_query_params: bool) -> String {
    let path = request.path();
    let Some(query) = request.query_string() else {
        return path.to_owned();
    };

    let mut pairs = residual_pairs(query);
    if sort_query_params {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
    }

    if pairs.is_empty() {
        path.to_owned()
    } else {
        let query: Vec<&str> = pairs.into_iter().map(|(_, raw)| raw).collect();
        format!("{path}?{}", query.join("&"))
    }
}

/// Strips every character that is not URL-safe.
///
/// ```
/// use restash::cache::key::sanitize;
///
/// assert_eq!(sanitize("/posts?q=a b\n"), "/posts?q=ab");
/// assert_eq!(sanitize("/caf\u{e9}"), "/caf");
/// ```
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || URL_SAFE_PUNCTUATION.contains(*c))
        .collect()
}

/// Derives the base cache key for `request`, before any hook remaps it.
pub fn derive_key(request: &Request, sort_query_params: bool) -> String {
    sanitize(&residual_uri(request, sort_query_params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn get(target: &str) -> Request {
        Request::new(Method::Get, target)
    }

    #[test]
    fn control_params_never_reach_the_key() {
        let plain = derive_key(&get("/wp/v2/posts?per_page=5"), true);
        for target in [
            "/wp/v2/posts?per_page=5&cache_refresh=1",
            "/wp/v2/posts?cache_delete=true&per_page=5",
            "/wp/v2/posts?per_page=5&cache_force_delete=0&cache_refresh=yes",
            "/wp/v2/posts?per_page=5&cache%5Fdelete=1",
        ] {
            assert_eq!(derive_key(&get(target), true), plain, "{target}");
        }
    }

    #[test]
    fn only_control_params_leaves_bare_path() {
        assert_eq!(derive_key(&get("/posts?cache_refresh=1"), true), "/posts");
        assert_eq!(derive_key(&get("/posts?"), true), "/posts");
    }

    #[test]
    fn sorting_merges_reordered_queries() {
        let a = get("/posts?b=1&a=2");
        let b = get("/posts?a=2&b=1");
        assert_eq!(derive_key(&a, true), derive_key(&b, true));
        assert_ne!(derive_key(&a, false), derive_key(&b, false));
    }

    #[test]
    fn sorting_keeps_repeated_value_order() {
        let a = get("/posts?tag=x&id=1&tag=y");
        let b = get("/posts?tag=y&id=1&tag=x");
        assert_eq!(derive_key(&a, true), "/posts?id=1&tag=x&tag=y");
        assert_ne!(derive_key(&a, true), derive_key(&b, true));
    }

    #[test]
    fn unsorted_key_preserves_raw_pairs() {
        let req = get("/search?q=rust%20lang&page=2&cache_delete=1");
        assert_eq!(derive_key(&req, false), "/search?q=rust%20lang&page=2");
    }

    #[test]
    fn flags_parse_permissively() {
        let req = get("/p?cache_delete=ON&cache_force_delete=false&cache_refresh=");
        assert_eq!(
            ControlFlags::from_request(&req),
            ControlFlags {
                delete: true,
                force_delete: false,
                refresh: false,
            }
        );

        let repeated = get("/p?cache_refresh=1&cache_refresh=0");
        assert!(!ControlFlags::from_request(&repeated).refresh);
    }

    #[test]
    fn sanitize_drops_control_and_non_ascii() {
        assert_eq!(sanitize("/a\tb\u{7f}c\u{1F600}"), "/abc");
        assert_eq!(sanitize("/a?b=[1]&c={2}"), "/a?b=[1]&c={2}");
    }
}
