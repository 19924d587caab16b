use axum::http::header::CACHE_CONTROL;
use axum::http::HeaderMap;

/// Whether a response may be stored, judged from its headers alone.
///
/// Anything is cacheable unless a `Cache-Control` value contains `no-cache`
/// or `no-store`. The match is a case-sensitive substring check on the raw
/// value, and every `Cache-Control` field line counts. Status codes,
/// `private`, `max-age=0` and `Vary` are deliberately not considered.
pub fn is_cacheable(headers: &HeaderMap) -> bool {
    !headers.get_all(CACHE_CONTROL).iter().any(|value| {
        let raw = String::from_utf8_lossy(value.as_bytes());
        raw.contains("no-cache") || raw.contains("no-store")
    })
}
