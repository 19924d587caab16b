use axum::http::header::{
    HeaderName, CONNECTION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderValue};

/// Hit/miss indicator attached to every response leaving the proxy.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const CACHE_HIT: HeaderValue = HeaderValue::from_static("HIT");
pub const CACHE_MISS: HeaderValue = HeaderValue::from_static("MISS");

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Headers that only describe a single connection and never cross the proxy.
pub const HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    KEEP_ALIVE,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        if headers.remove(name).is_some() {
            tracing::trace!(header = %name, "removed hop-by-hop header");
        }
    }
}

/// Final cleanup for every outgoing response, cached or not.
///
/// Strips hop-by-hop headers and leaves exactly one `X-Cache` value,
/// defaulting to `MISS` when the transport did not set one.
pub fn rewrite_response(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);

    let indicator = match headers.get(X_CACHE) {
        Some(value) => value.clone(),
        None => {
            tracing::debug!("X-Cache header missing, forcing MISS");
            CACHE_MISS
        }
    };
    headers.insert(X_CACHE, indicator);
}
