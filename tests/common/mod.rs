//! Test utilities and common setup.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use sandbox_mcp::agent::testing::{AgentScript, ScriptedAgentLauncher};
use sandbox_mcp::api::{create_router, AppState};
use sandbox_mcp::sandbox::testing::ScriptedSandbox;
use sandbox_mcp::settings::Settings;
use sandbox_mcp::storage::MemoryStore;

pub const TEST_AUTH_TOKEN: &str = "test-auth-token-for-integration";
pub const TEST_JWT_SECRET: &str = "test-proxy-secret-minimum-32-chars!!";

/// A fully wired application over in-memory storage, a scripted sandbox,
/// and a scripted agent.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub sandbox: Arc<ScriptedSandbox>,
    pub script: Arc<AgentScript>,
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.auth.auth_token = Some(TEST_AUTH_TOKEN.to_string());
    settings.auth.jwt_secret = Some(TEST_JWT_SECRET.to_string());
    settings.storage.backend = "memory".to_string();
    settings.telemetry.enabled = false;
    settings
}

/// Create a test application with all services initialized.
pub fn test_app() -> TestApp {
    test_app_with_script(AgentScript::answering("Task complete.\n\nSummary: done."))
}

pub fn test_app_with_script(script: Arc<AgentScript>) -> TestApp {
    let settings = test_settings();
    let store = Arc::new(MemoryStore::new());
    let sandbox = Arc::new(ScriptedSandbox::new());
    let launcher = Arc::new(ScriptedAgentLauncher::new(script.clone()));

    let state = AppState::build(&settings, store.clone(), sandbox.clone(), launcher)
        .expect("building test app state");
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        store,
        sandbox,
        script,
    }
}

/// Issue a raw request and return (status, parsed JSON body).
pub async fn request_json(
    router: &Router,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Invoke a tool through the JSON-RPC surface and decode the content block.
/// Returns (payload, is_error).
pub async fn call_tool(router: &Router, tool: &str, arguments: Value) -> (Value, bool) {
    let (status, body) = request_json(
        router,
        Method::POST,
        "/mcp",
        Some(TEST_AUTH_TOKEN),
        Some(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": arguments },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "tools/call transport failed: {body}");

    let result = &body["result"];
    let is_error = result["isError"].as_bool().unwrap_or(false);
    let text = result["content"][0]["text"]
        .as_str()
        .expect("tool result content block");
    (serde_json::from_str(text).expect("tool result JSON"), is_error)
}
