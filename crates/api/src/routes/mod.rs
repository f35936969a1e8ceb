//! HTTP routes

pub mod admin;
pub mod ocr;
pub mod payment;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::metrics::track_http;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "textbook-ocr";

/// Largest accepted upload
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    let ocr_routes = Router::new()
        .route(
            "/process",
            post(ocr::process).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/tokens", get(ocr::tokens));

    let payment_routes = Router::new()
        .route("/products", get(payment::products))
        .route("/checkout", post(payment::checkout))
        .route("/webhook", post(payment::webhook))
        .route("/status/{checkout_id}", get(payment::status));

    let admin_routes = Router::new().route("/invariants", get(admin::invariants));

    let metrics_route = match state.metrics.clone() {
        Some(handle) => {
            Router::new().route("/metrics", get(move || async move { handle.render() }))
        }
        None => Router::new(),
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api/v1/ocr", ocr_routes)
        .nest("/api/v1/payment", payment_routes)
        .nest("/api/v1/admin", admin_routes)
        .with_state(state)
        .merge(metrics_route)
        .layer(middleware::from_fn(track_http))
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "Textbook OCR API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
    }))
}

/// Header value as a string, `None` when absent or not valid UTF-8
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
