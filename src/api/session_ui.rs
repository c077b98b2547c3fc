//! Browser entry point for sessions.
//!
//! `GET /session/{id}` redirects into the agent's own web UI (served from
//! inside the sandbox) and pins the session with a cookie; every other
//! path carrying that cookie is reverse-proxied into the sandbox so all UI
//! asset traffic tunnels through the same origin.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, error};
use serde_json::json;

use super::error::ApiError;
use super::state::AppState;

/// Cookie pinning browser traffic to a session.
pub const SESSION_COOKIE: &str = "opencode_session_id";

/// `GET /session/{id}`: resolve the session and bounce into the agent UI.
pub async fn session_entry(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let session = state
        .sessions
        .get_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {session_id} not found")))?;

    let encoded_workspace = BASE64.encode(&session.workspace_path);
    let mut location = format!("/{encoded_workspace}/session");
    if let Some(agent_session) = &session.opencode_session_id {
        location.push('/');
        location.push_str(agent_session);
    }
    location.push_str(&format!("?url={}", state.base_url));

    let cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; SameSite=Lax");
    let response = Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header(header::SET_COOKIE, cookie)
        .body(Body::empty())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(response)
}

/// Fallback for every unrouted path: with a session cookie, tunnel into
/// the sandbox UI; without one, describe the service.
pub async fn fallback(State(state): State<AppState>, request: Request<Body>) -> Response {
    let session_id = request
        .headers()
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|cookies| cookie_value(cookies, SESSION_COOKIE));

    let Some(session_id) = session_id else {
        return service_info(&state).into_response();
    };

    match proxy_to_sandbox(&state, &session_id, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn proxy_to_sandbox(
    state: &AppState,
    session_id: &str,
    mut request: Request<Body>,
) -> Result<Response, ApiError> {
    let session = state
        .sessions
        .get_session(session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {session_id} not found")))?;

    let target_base = state
        .runtime
        .expose_port(&session.sandbox_id, state.agent_port)
        .await
        .map_err(|e| ApiError::bad_gateway(e.to_string()))?;

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let target = format!("{}{path_and_query}", target_base.trim_end_matches('/'));
    debug!("tunneling {} to {target}", session.session_id);

    let uri: Uri = target
        .parse()
        .map_err(|e| ApiError::internal(format!("invalid target uri {target}: {e}")))?;
    *request.uri_mut() = uri;

    // Ensure the Host header matches the target authority.
    if let Some(authority) = request.uri().authority() {
        let value = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ApiError::internal(e.to_string()))?;
        request.headers_mut().insert(header::HOST, value);
    }

    let response = state.http_client.request(request).await.map_err(|e| {
        error!("sandbox UI proxy failed: {e:?}");
        ApiError::bad_gateway(format!("sandbox unreachable: {e}"))
    })?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}

fn service_info(state: &AppState) -> Json<serde_json::Value> {
    Json(json!({
        "service": crate::telemetry::SERVICE_NAME,
        "version": crate::telemetry::service_version(),
        "endpoints": {
            "health": format!("{}/health", state.base_url),
            "rpc": format!("{}/mcp", state.base_url),
            "proxy": format!("{}/proxy/{{service}}/...", state.base_url),
            "sessionUi": format!("{}/session/{{sessionId}}", state.base_url),
        },
    }))
}

fn cookie_value(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim() == name {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}
