use crate::error::ProxyError;
use crate::forward::build_client;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusHandle;
use proxy_cache::ResponseCache;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub const CLEAR_PATH: &str = "/cache/clear";

/// State for the admin router (separate listener from the proxy).
#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<ResponseCache>,
    pub prometheus: PrometheusHandle,
}

/// Result of a cache clear, as reported by the admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub cleared: usize,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route(CLEAR_PATH, post(clear_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /cache/clear: drop every cached response, keep serving.
pub async fn clear_handler(State(state): State<AdminState>) -> Json<ClearReport> {
    let cleared = state.cache.flush();
    tracing::info!(cleared, "in-memory cache cleared");
    Json(ClearReport { cleared })
}

/// GET /cache/stats: one-shot cache statistics.
pub async fn stats_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let stats = state.cache.stats();
    let lookups = stats.hits + stats.misses;
    Json(serde_json::json!({
        "entries": stats.entries,
        "hits": stats.hits,
        "misses": stats.misses,
        "hit_rate": if lookups > 0 { stats.hits as f64 / lookups as f64 } else { 0.0 },
    }))
}

pub async fn metrics_handler(State(state): State<AdminState>) -> String {
    state.prometheus.render()
}

#[derive(Debug, Error)]
pub enum ClearError {
    #[error(transparent)]
    Transport(#[from] ProxyError),

    #[error("admin endpoint answered {0}")]
    Status(StatusCode),

    #[error("unexpected admin response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Ask a running proxy to clear its cache through the admin listener.
pub async fn request_clear(admin_addr: SocketAddr) -> Result<ClearReport, ClearError> {
    let client = build_client();
    let req = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{admin_addr}{CLEAR_PATH}"))
        .body(Body::empty())
        .map_err(ProxyError::from)?;

    let resp = client.request(req).await.map_err(ProxyError::from)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ClearError::Status(status));
    }

    let body = Body::new(resp.into_body())
        .collect()
        .await
        .map_err(ProxyError::Body)?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use proxy_cache::CacheEntry;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AdminState {
        let cache = Arc::new(ResponseCache::new());
        for i in 0..3 {
            cache.set(
                format!("GET:http://origin/{i}"),
                CacheEntry::new(StatusCode::OK, Default::default(), Bytes::from_static(b"x")),
                Duration::from_secs(60),
            );
        }
        AdminState {
            cache,
            prometheus: PrometheusBuilder::new().build_recorder().handle(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn clear_flushes_and_reports_count() {
        let state = state();
        let cache = Arc::clone(&state.cache);
        let app = admin_router(state);

        let req = Request::builder()
            .method(Method::POST)
            .uri(CLEAR_PATH)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, serde_json::json!({ "cleared": 3 }));
        assert!(cache.is_empty());
        assert!(cache.get("GET:http://origin/0").is_none());
    }

    #[tokio::test]
    async fn clear_requires_post() {
        let app = admin_router(state());

        let req = Request::builder().uri(CLEAR_PATH).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn stats_reports_entries_and_lookups() {
        let state = state();
        state.cache.get("GET:http://origin/0");
        state.cache.get("GET:http://origin/nope");
        let app = admin_router(state);

        let req = Request::builder().uri("/cache/stats").body(Body::empty()).unwrap();
        let body = json_body(app.oneshot(req).await.unwrap()).await;

        assert_eq!(body["entries"], 3);
        assert_eq!(body["hits"], 1);
        assert_eq!(body["misses"], 1);
        assert_eq!(body["hit_rate"], 0.5);
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let app = admin_router(state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn request_clear_round_trip() {
        let state = state();
        let cache = Arc::clone(&state.cache);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, admin_router(state)).await.unwrap();
        });

        let report = request_clear(addr).await.unwrap();

        assert_eq!(report, ClearReport { cleared: 3 });
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn request_clear_without_running_proxy_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = request_clear(addr).await.unwrap_err();
        assert!(matches!(err, ClearError::Transport(ProxyError::Upstream(_))));
    }
}
