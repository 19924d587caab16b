use crate::forward::{Forward, Origin};
use crate::rewrite::{rewrite_response, X_CACHE};
use crate::transport::CachingTransport;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response};
use axum::routing::any;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared application state passed to the proxy handler.
pub struct AppState<F> {
    pub origin: Origin,
    pub transport: CachingTransport<F>,
}

/// Router that sends every path and method through the caching transport.
pub fn router<F: Forward>(state: Arc<AppState<F>>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler::<F>))
        .route("/", any(proxy_handler::<F>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main proxy handler: direct to the origin, run the transport, clean up headers.
pub async fn proxy_handler<F: Forward>(
    State(state): State<Arc<AppState<F>>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let result = match state.origin.direct(req) {
        Ok(req) => state.transport.handle(req).await,
        Err(e) => Err(e),
    };

    let mut response = match result {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(method = %method, uri = %uri, error = %e, "proxy request failed");
            let mut resp = Response::new(Body::from(e.status().canonical_reason().unwrap_or("")));
            *resp.status_mut() = e.status();
            resp
        }
    };

    rewrite_response(response.headers_mut());

    tracing::debug!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        cache = ?response.headers().get(X_CACHE),
        latency_us = start.elapsed().as_micros() as u64,
        "request served"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::rewrite::HOP_BY_HOP;
    use crate::testing::{body_of, respond, ScriptedForwarder};
    use axum::http::header::HOST;
    use axum::http::{Method, StatusCode};
    use proxy_cache::ResponseCache;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(origin: &Arc<ScriptedForwarder>) -> (Router, Arc<ResponseCache>) {
        let cache = Arc::new(ResponseCache::new());
        let state = Arc::new(AppState {
            origin: Origin::parse("http://origin.test:8080").unwrap(),
            transport: CachingTransport::new(Arc::clone(origin), Arc::clone(&cache)),
        });
        (router(state), cache)
    }

    fn inbound(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(HOST, "proxy.local:3000")
            .body(Body::empty())
            .unwrap()
    }

    fn hop_by_hop_response() -> Result<Response<Body>, ProxyError> {
        respond(
            200,
            &[
                ("connection", "keep-alive"),
                ("keep-alive", "timeout=5"),
                ("proxy-authenticate", "Basic"),
                ("proxy-authorization", "Basic Zm9v"),
                ("te", "trailers"),
                ("trailer", "Expires"),
                ("transfer-encoding", "chunked"),
                ("upgrade", "h2c"),
                ("content-type", "text/plain"),
            ],
            "body",
        )
    }

    fn assert_clean(resp: &Response<Body>) {
        for name in &HOP_BY_HOP {
            assert!(!resp.headers().contains_key(name), "{name} reached the client");
        }
        assert_eq!(resp.headers().get_all(X_CACHE).iter().count(), 1);
    }

    #[tokio::test]
    async fn miss_then_hit_are_both_cleaned() {
        let origin = Arc::new(ScriptedForwarder::new(|_| hop_by_hop_response()));
        let (app, _) = app(&origin);

        let miss = app.clone().oneshot(inbound("/page")).await.unwrap();
        assert_clean(&miss);
        assert_eq!(miss.headers()[X_CACHE], "MISS");
        assert_eq!(miss.headers()["content-type"], "text/plain");
        assert_eq!(body_of(miss).await, "body");

        let hit = app.oneshot(inbound("/page")).await.unwrap();
        assert_clean(&hit);
        assert_eq!(hit.headers()[X_CACHE], "HIT");
        assert_eq!(body_of(hit).await, "body");

        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn requests_reach_origin_with_rewritten_target() {
        let origin = Arc::new(ScriptedForwarder::new(|_| respond(200, &[], "ok")));
        let (app, cache) = app(&origin);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/items/1?size=large")
            .header(HOST, "proxy.local:3000")
            .header("x-forwarded-for", "10.1.1.1")
            .header("via", "1.1 upstream-proxy")
            .body(Body::empty())
            .unwrap();
        app.oneshot(req).await.unwrap();

        let seen = origin.seen();
        assert_eq!(
            seen[0].uri.to_string(),
            "http://origin.test:8080/items/1?size=large"
        );
        assert_eq!(seen[0].headers[HOST], "origin.test:8080");
        assert!(!seen[0].headers.contains_key("x-forwarded-for"));
        assert!(!seen[0].headers.contains_key("via"));
        assert!(cache
            .get("GET:http://origin.test:8080/items/1?size=large")
            .is_some());
    }

    #[tokio::test]
    async fn root_path_is_proxied() {
        let origin = Arc::new(ScriptedForwarder::new(|_| respond(200, &[], "home")));
        let (app, _) = app(&origin);

        let resp = app.oneshot(inbound("/")).await.unwrap();

        assert_eq!(body_of(resp).await, "home");
        assert_eq!(origin.seen()[0].uri.to_string(), "http://origin.test:8080/");
    }

    #[tokio::test]
    async fn bypass_through_the_router() {
        let origin = Arc::new(ScriptedForwarder::new(|_| respond(200, &[], "ok")));
        let (app, _) = app(&origin);

        app.clone().oneshot(inbound("/a?bypass-cache=true")).await.unwrap();
        let resp = app.oneshot(inbound("/a?bypass-cache=true")).await.unwrap();

        assert_eq!(resp.headers()[X_CACHE], "MISS");
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn forwarding_failure_becomes_bad_gateway_with_indicator() {
        let origin = Arc::new(ScriptedForwarder::new(|_| {
            Err(ProxyError::Body(axum::Error::new(std::io::Error::other(
                "connection reset",
            ))))
        }));
        let (app, cache) = app(&origin);

        let resp = app.oneshot(inbound("/a")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_clean(&resp);
        assert_eq!(resp.headers()[X_CACHE], "MISS");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn upstream_timeout_becomes_gateway_timeout() {
        let origin = Arc::new(ScriptedForwarder::new(|_| {
            Err(ProxyError::Timeout(Duration::from_secs(30)))
        }));
        let (app, _) = app(&origin);

        let resp = app.oneshot(inbound("/slow")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(resp.headers()[X_CACHE], "MISS");
    }

    #[tokio::test]
    async fn redirects_are_followed_inside_the_proxy() {
        let origin = Arc::new(ScriptedForwarder::new(|req| match req.uri.path() {
            "/old" => respond(302, &[("location", "/new")], ""),
            _ => respond(200, &[], "new content"),
        }));
        let (app, _) = app(&origin);

        let resp = app.oneshot(inbound("/old")).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("location"));
        assert_eq!(body_of(resp).await, "new content");
    }
}
