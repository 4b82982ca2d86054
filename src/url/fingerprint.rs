use crate::url::normalize::normalize_str;
use fnv::FnvHasher;
use std::hash::Hasher;

/// Computes the deduplication fingerprint of a request
///
/// The fingerprint is the 64-bit FNV-1a hash of the normalized URL followed
/// by the body bytes, if any. Method and headers are deliberately not part of it: a GET and a HEAD
/// to the same URL share a fingerprint.
///
/// # Examples
///
/// ```
/// use gleaner::url::fingerprint;
///
/// assert_eq!(
///     fingerprint("http://EXAMPLE.com:80/a", None),
///     fingerprint("http://example.com/a", None),
/// );
/// assert_ne!(
///     fingerprint("http://example.com/a", Some(b"q=1")),
///     fingerprint("http://example.com/a", Some(b"q=2")),
/// );
/// ```
pub fn fingerprint(url: &str, body: Option<&[u8]>) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(normalize_str(url).as_bytes());
    if let Some(body) = body {
        hasher.write(body);
    }
    hasher.finish()
}
