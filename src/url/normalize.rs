use crate::UrlError;
use url::form_urlencoded;
use url::Url;

/// Normalizes a URL with a WHATWG-compliant parser
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or relative
/// 2. Lowercase the scheme and host, convert IDNA hosts to punycode
/// 3. Drop default ports (`:80` for http, `:443` for https)
/// 4. Resolve dot segments and percent-encode characters outside the URL code points
///
/// Fragments and query parameters are left as they are: two URLs differing
/// only in those components are different resources for deduplication.
///
/// # Examples
///
/// ```
/// use gleaner::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/./b/../c").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a/c");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(format!("{}: {}", url_str, e)))
}

/// Returns the normalized form of `url_str`, or the input unchanged if it does not parse
pub fn normalize_str(url_str: &str) -> String {
    match normalize_url(url_str) {
        Ok(url) => url.to_string(),
        Err(_) => url_str.to_string(),
    }
}

/// Returns the hostname of a URL without port or IPv6 brackets
///
/// This is the value domain allow/deny lists are compared against.
pub fn hostname(url: &Url) -> String {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .unwrap_or_default()
}

/// Returns `host[:port]` for a URL, keeping an explicit non-default port
///
/// Robots rulesets are cached under this key, and redirect hops compare it to
/// decide whether credentials may travel along.
pub fn host_key(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

/// Re-encodes the query string of a URL with its parameters sorted by key
///
/// Returns `None` when the URL has no query.
pub fn sorted_query(url: &Url) -> Option<String> {
    url.query()?;

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    // Stable sort keeps repeated keys in their original order
    params.sort_by(|a, b| a.0.cmp(&b.0));

    Some(
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish(),
    )
}
