//! API route definitions.

use axum::http::{header, HeaderValue, Method};
use axum::routing::{any, get, post};
use axum::{extract::State, response::IntoResponse, Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::proxy::handle_proxy;

use super::rpc;
use super::session_ui;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/health", get(health))
        // JSON-RPC tool surface.
        .route("/mcp", post(rpc::handle_rpc))
        .route("/mcp/{*rest}", post(rpc::handle_rpc))
        // Credential proxy. The bare mount is routed too so malformed
        // paths get the proxy's own 400 rather than the fallback.
        .route("/proxy", any(proxy_entry))
        .route("/proxy/", any(proxy_entry))
        .route("/proxy/{*rest}", any(proxy_entry))
        // Browser entry point.
        .route("/session/{session_id}", get(session_ui::session_entry))
        // Cookie-gated tunnel into the sandbox UI.
        .fallback(session_ui::fallback)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::telemetry::service_version(),
    }))
}

async fn proxy_entry(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> axum::response::Response {
    handle_proxy(&state.proxy, request).await
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let allow_origin = if origins.is_empty() {
        // Development default: no origins configured means permissive.
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
