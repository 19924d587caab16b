use axum::extract::Path;
use axum::http::header::{CACHE_CONTROL, LOCATION};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

async fn get_item(Path(id): Path<u64>) -> Json<Value> {
    // Simulate upstream latency (5-20ms)
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    Json(json!({
        "id": id,
        "name": format!("Item {}", id),
        "data": "x".repeat(256),
        "latency_ms": delay,
    }))
}

async fn get_private(Path(id): Path<u64>) -> impl IntoResponse {
    (
        [(CACHE_CONTROL, "no-store")],
        Json(json!({ "id": id, "secret": rand::thread_rng().gen::<u32>() })),
    )
}

/// `/redirect/{hops}` answers 302 to `/redirect/{hops - 1}` until it reaches zero.
async fn redirect(Path(hops): Path<u32>) -> impl IntoResponse {
    if hops == 0 {
        return (StatusCode::OK, "end of redirect chain").into_response();
    }
    let next = format!("/redirect/{}", hops - 1);
    (StatusCode::FOUND, [(LOCATION, next)]).into_response()
}

async fn submit(body: String) -> impl IntoResponse {
    tracing::info!(bytes = body.len(), "form submitted");
    (StatusCode::SEE_OTHER, [(LOCATION, "/items/1")])
}

async fn health() -> &'static str {
    "ok"
}

fn app() -> Router {
    Router::new()
        .route("/items/{id}", get(get_item))
        .route("/private/{id}", get(get_private))
        .route("/redirect/{hops}", get(redirect))
        .route("/submit", post(submit))
        .route("/health", get(health))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("DEMO_ORIGIN_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".into());
    tracing::info!(addr = %addr, "demo origin starting");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind demo origin to {addr}: {e}"));
    if let Err(e) = axum::serve(listener, app()).await {
        tracing::error!(error = %e, "demo origin stopped");
    }
}
