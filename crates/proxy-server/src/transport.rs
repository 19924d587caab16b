use crate::error::ProxyError;
use crate::forward::Forward;
use crate::policy::is_cacheable;
use crate::rewrite::{CACHE_HIT, CACHE_MISS, X_CACHE};
use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use proxy_cache::{CacheEntry, ResponseCache};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// How long a stored response stays visible.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Redirect hops followed before the last response is returned as-is.
pub const MAX_REDIRECTS: usize = 10;
/// Largest inbound request body buffered for forwarding.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const BYPASS_MARKER: &str = "bypass-cache=true";

/// Cache key for a request: method and absolute URL, query included.
pub fn cache_key(method: &Method, uri: &Uri) -> String {
    format!("{method}:{uri}")
}

fn wants_bypass(uri: &Uri) -> bool {
    uri.query().is_some_and(|q| q.contains(BYPASS_MARKER))
}

/// Wraps a forwarder with a response cache and in-proxy redirect following.
///
/// Every response coming out of [`CachingTransport::handle`] carries
/// `X-Cache: HIT` when it was served from the cache and `X-Cache: MISS`
/// otherwise, even if the fresh response was stored on the way out.
pub struct CachingTransport<F> {
    forwarder: F,
    cache: Arc<ResponseCache>,
    ttl: Duration,
    max_redirects: usize,
    max_body_bytes: usize,
}

impl<F: Forward> CachingTransport<F> {
    pub fn new(forwarder: F, cache: Arc<ResponseCache>) -> Self {
        Self {
            forwarder,
            cache,
            ttl: DEFAULT_TTL,
            max_redirects: MAX_REDIRECTS,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let key = cache_key(req.method(), req.uri());

        if wants_bypass(req.uri()) {
            tracing::debug!(key = %key, "cache bypass requested");
        } else if let Some(entry) = self.cache.get(&key) {
            tracing::debug!(key = %key, status = entry.status.as_u16(), "cache HIT");
            metrics::counter!("proxy_cache_hits_total").increment(1);
            return Ok(hit_response(&entry));
        }

        metrics::counter!("proxy_cache_misses_total").increment(1);
        tracing::debug!(key = %key, "cache MISS, forwarding to origin");

        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                tracing::warn!(
                    key = %key,
                    limit = self.max_body_bytes,
                    "request body too large"
                );
                return Err(ProxyError::PayloadTooLarge(self.max_body_bytes));
            }
            Err(e) => return Err(ProxyError::Body(axum::Error::new(e))),
        };
        let mut outbound = Outbound {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        };

        let mut resp = self.send(&key, &outbound).await?;
        let mut redirects = 0;
        while redirects < self.max_redirects && resp.status().is_redirection() {
            let status = resp.status();
            let Some(location) = redirect_target(resp.headers(), &outbound.uri) else {
                break;
            };
            tracing::debug!(
                key = %key,
                status = status.as_u16(),
                location = %location,
                "following redirect"
            );

            outbound = outbound.follow(location, status == StatusCode::SEE_OTHER);
            resp = self.send(&key, &outbound).await?;
            redirects += 1;
            metrics::counter!("proxy_redirects_followed_total").increment(1);
        }
        if redirects == self.max_redirects && resp.status().is_redirection() {
            tracing::warn!(key = %key, redirects, "maximum redirects reached");
        }

        if is_cacheable(resp.headers()) {
            let (mut parts, body) = resp.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to read upstream body");
                    return Err(ProxyError::Body(e));
                }
            };

            let entry = CacheEntry::new(parts.status, parts.headers.clone(), body.clone());
            self.cache.set(key.clone(), entry, self.ttl);
            metrics::counter!("proxy_cache_stores_total").increment(1);
            tracing::debug!(
                key = %key,
                status = parts.status.as_u16(),
                bytes = body.len(),
                "stored final response"
            );

            parts.headers.insert(X_CACHE, CACHE_MISS);
            return Ok(Response::from_parts(parts, Body::from(body)));
        }

        tracing::debug!(
            key = %key,
            cache_control = ?resp.headers().get(axum::http::header::CACHE_CONTROL),
            "final response not cacheable"
        );
        resp.headers_mut().insert(X_CACHE, CACHE_MISS);
        Ok(resp)
    }

    async fn send(&self, key: &str, outbound: &Outbound) -> Result<Response<Body>, ProxyError> {
        match self.forwarder.forward(outbound.to_request()).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    upstream = %outbound.uri,
                    error = %e,
                    "forwarding failed"
                );
                metrics::counter!("proxy_upstream_errors_total").increment(1);
                Err(e)
            }
        }
    }
}

/// Fresh response over a cached snapshot.
fn hit_response(entry: &CacheEntry) -> Response<Body> {
    let mut resp = Response::new(Body::from(entry.body.clone()));
    *resp.status_mut() = entry.status;
    *resp.headers_mut() = entry.headers.clone();
    resp.headers_mut().insert(X_CACHE, CACHE_HIT);
    resp
}

/// Where a redirect response points, resolved against the request URL.
///
/// `None` when there is no usable `Location`, which ends the chain.
fn redirect_target(headers: &HeaderMap, base: &Uri) -> Option<Uri> {
    let value = headers.get(LOCATION)?;
    let Ok(location) = value.to_str() else {
        tracing::warn!(
            base = %base,
            location = ?value,
            "redirect location is not visible ASCII"
        );
        return None;
    };
    if location.is_empty() {
        return None;
    }
    match resolve(base, location) {
        Some(uri) => Some(uri),
        None => {
            tracing::warn!(base = %base, location, "unparseable redirect location");
            None
        }
    }
}

fn resolve(base: &Uri, location: &str) -> Option<Uri> {
    let base = Url::parse(&base.to_string()).ok()?;
    let mut next = base.join(location).ok()?;
    next.set_fragment(None);
    next.as_str().parse().ok()
}

/// One hop of an outbound request.
///
/// The body is buffered so every hop can be rebuilt from scratch; a
/// redirect produces a new value instead of mutating the previous one.
#[derive(Clone, Debug)]
struct Outbound {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl Outbound {
    fn to_request(&self) -> Request<Body> {
        let mut req = Request::new(Body::from(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.headers_mut() = self.headers.clone();
        req
    }

    /// The request to send after a redirect to `location`. A 303 turns the
    /// request into a body-less GET.
    fn follow(&self, location: Uri, see_other: bool) -> Self {
        let mut next = self.clone();
        if see_other {
            next.method = Method::GET;
            next.body = Bytes::new();
            for name in [CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING] {
                next.headers.remove(name);
            }
        }
        if let Some(host) = location
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        {
            next.headers.insert(HOST, host);
        }
        next.uri = location;
        next
    }
}
