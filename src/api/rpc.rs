//! JSON-RPC binding for the tool surface.
//!
//! `POST /mcp` speaks the JSON-RPC tool protocol: `initialize`,
//! `tools/list`, and `tools/call`. The whole surface sits behind a static
//! bearer token; tool results are JSON serialized into a single text
//! content block.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::telemetry::{service_version, SERVICE_NAME};

use super::error::ApiError;
use super::state::AppState;

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn rpc_result(id: Option<Value>, result: Value) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    }))
}

fn rpc_error(id: Option<Value>, code: i64, message: impl Into<String>) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    }))
}

fn check_bearer(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.auth_token else {
        return Err(ApiError::unauthorized("AUTH_TOKEN is not configured"));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let mut parts = value.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
                    Some(token)
                }
                _ => None,
            }
        })
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    if presented != expected {
        return Err(ApiError::unauthorized("invalid bearer token"));
    }
    Ok(())
}

/// `POST /mcp` and sub-paths.
pub async fn handle_rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(err) = check_bearer(&state, &headers) {
        return err.into_response();
    }

    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => return rpc_error(None, PARSE_ERROR, format!("parse error: {e}")).into_response(),
    };

    debug!("rpc method {}", request.method);
    let id = request.id.clone();
    match request.method.as_str() {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVICE_NAME, "version": service_version() },
            }),
        )
        .into_response(),

        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),

        "tools/list" => rpc_result(id, json!({ "tools": tool_descriptors() })).into_response(),

        "tools/call" => handle_tool_call(&state, id, request.params).await.into_response(),

        other => {
            rpc_error(id, METHOD_NOT_FOUND, format!("method not found: {other}")).into_response()
        }
    }
}

async fn handle_tool_call(state: &AppState, id: Option<Value>, params: Value) -> Json<Value> {
    let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
        return rpc_error(id, INVALID_PARAMS, "tools/call requires params.name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let (text, is_error) = match state.dispatcher.dispatch(&name, arguments).await {
        Ok(value) => (value.to_string(), false),
        Err(err) => (err.to_body().to_string(), true),
    };

    rpc_result(
        id,
        json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error,
        }),
    )
}

fn tool_descriptors() -> Value {
    json!([
        {
            "name": "run_task",
            "description": "Execute a natural-language coding task in an isolated sandbox. \
                            Creates a new session unless sessionId continues an existing one. \
                            Returns immediately with a runId to poll via get_result.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "task": { "type": "string", "description": "The coding task to perform" },
                    "sessionId": { "type": "string", "description": "Existing session to continue" },
                    "repository": { "type": "string", "description": "GitHub repository URL to clone (https://github.com/...)" },
                    "branch": { "type": "string", "description": "Branch to check out" },
                    "model": { "type": "string", "description": "Model override for this run" },
                    "title": { "type": "string", "description": "Short label for the run" }
                },
                "required": ["task"]
            }
        },
        {
            "name": "get_result",
            "description": "Fetch the current state of a run, including its result once terminal.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "runId": { "type": "string" }
                },
                "required": ["runId"]
            }
        },
        {
            "name": "list_runs",
            "description": "List runs across sessions, newest first, with optional filters.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "sessionId": { "type": "string" },
                    "status": { "type": "string", "enum": ["started", "running", "completed", "failed"] },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 10 },
                    "before": { "type": "integer", "description": "Only runs started before this UNIX-ms instant" }
                }
            }
        }
    ])
}
