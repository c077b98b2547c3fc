//! HTTP surface integration tests.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

mod common;
use common::{call_tool, request_json, test_app, TEST_AUTH_TOKEN};

/// Health endpoint works without authentication.
#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let (status, body) = request_json(&app.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

/// The tool RPC surface rejects missing and mismatched bearers.
#[tokio::test]
async fn test_mcp_requires_bearer() {
    let app = test_app();
    let rpc = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});

    let (status, _) =
        request_json(&app.router, Method::POST, "/mcp", None, Some(rpc.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
        request_json(&app.router, Method::POST, "/mcp", Some("wrong-token"), Some(rpc)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tools_list() {
    let app = test_app();
    let (status, body) = request_json(
        &app.router,
        Method::POST,
        "/mcp",
        Some(TEST_AUTH_TOKEN),
        Some(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["run_task", "get_result", "list_runs"]);
}

#[tokio::test]
async fn test_unknown_rpc_method() {
    let app = test_app();
    let (status, body) = request_json(
        &app.router,
        Method::POST,
        "/mcp",
        Some(TEST_AUTH_TOKEN),
        Some(json!({"jsonrpc": "2.0", "id": 4, "method": "resources/list"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 4);
}

/// The default path without a session cookie answers with service info.
#[tokio::test]
async fn test_default_path_lists_endpoints() {
    let app = test_app();
    let (status, body) = request_json(&app.router, Method::GET, "/anything", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "sandbox-mcp");
    assert!(body["endpoints"]["rpc"].as_str().unwrap().contains("/mcp"));
}

#[tokio::test]
async fn test_session_entry_missing_session_is_404() {
    let app = test_app();
    let (status, body) =
        request_json(&app.router, Method::GET, "/session/deadbeef", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("deadbeef"));
}

/// The session entry point redirects into the sandbox UI and pins the
/// session cookie.
#[tokio::test]
async fn test_session_entry_redirects_with_cookie() {
    let app = test_app();
    let (session, _) = call_tool(&app.router, "run_task", json!({"task": "hello"})).await;
    let session_id = session["sessionId"].as_str().unwrap().to_string();
    app.state.engine.wait(session["runId"].as_str().unwrap()).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri(format!("/session/{session_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.contains("/session"));
    assert!(location.contains("?url="));

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cookie.contains(&format!("opencode_session_id={session_id}")));
    assert!(cookie.contains("SameSite=Lax"));
}

/// Validation failures surface as structured tool errors.
#[tokio::test]
async fn test_run_task_validation_error() {
    let app = test_app();
    let (body, is_error) = call_tool(
        &app.router,
        "run_task",
        json!({"task": "x", "repository": "https://gitlab.com/u/r"}),
    )
    .await;
    assert!(is_error);
    assert_eq!(body["code"], "ValidationError");
}

#[tokio::test]
async fn test_unknown_tool_is_validation_error() {
    let app = test_app();
    let (body, is_error) = call_tool(&app.router, "destroy_sandbox", json!({})).await;
    assert!(is_error);
    assert_eq!(body["code"], "ValidationError");
}
