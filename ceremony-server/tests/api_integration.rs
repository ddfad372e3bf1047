//! API integration tests for ceremony-server.
//!
//! These tests drive the HTTP API through the full router, covering the
//! ceremony lifecycle the browser client exercises: start, finish, replay,
//! supersession, and credential management.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use ceremony_server::{create_router, AppState, Config};

/// Build the test router with in-memory credential storage
fn create_test_app() -> Router {
    let config = Config::default();
    let state = Arc::new(AppState::in_memory(&config).expect("test state"));
    create_router(&config, state)
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// ============================================================================
// Health & Readiness Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let app = create_test_app();

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "ceremony-server");
    assert_eq!(body["persistent"], false);
    assert_eq!(body["pending_ceremonies"], 0);
}

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let app = create_test_app();

    let (status, body) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

// ============================================================================
// Ceremony Start Tests
// ============================================================================

#[tokio::test]
async fn test_register_start_issues_challenge() {
    let app = create_test_app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/register/start",
        json!({ "username": "alice" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["ceremony_id"].is_string());
    assert!(body["challenge"].is_string());
    assert!(body["public_key"]["publicKey"].is_object());
    assert!(body["expires_at"].is_string());
}

#[tokio::test]
async fn test_auth_start_usernameless_uses_discoverable_flow() {
    let app = create_test_app();

    // Browser clients post an empty object for usernameless login
    let (status, body) = send_json(&app, "POST", "/ceremony/auth/start", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["ceremony_id"].is_string());
    assert!(body["public_key"]["publicKey"].is_object());
}

#[tokio::test]
async fn test_auth_start_with_unknown_username_fails() {
    let app = create_test_app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/auth/start",
        json!({ "username": "nobody" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "VERIFICATION_FAILED");
}

// ============================================================================
// Ceremony Finish Tests
// ============================================================================

#[tokio::test]
async fn test_finish_with_unknown_ceremony_is_generic_error() {
    let app = create_test_app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/register/finish",
        json!({ "ceremony_id": "does-not-exist", "response": {} }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_CEREMONY");
    assert_eq!(body["error"], "Invalid or expired ceremony");
}

#[tokio::test]
async fn test_failed_finish_consumes_the_challenge() {
    let app = create_test_app();

    let (_, start) = send_json(
        &app,
        "POST",
        "/ceremony/register/start",
        json!({ "username": "alice" }),
    )
    .await;
    let ceremony_id = start["ceremony_id"].as_str().unwrap().to_string();

    // A malformed credential fails verification...
    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/register/finish",
        json!({ "ceremony_id": ceremony_id, "response": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "VERIFICATION_FAILED");

    // ...and the challenge was consumed before verification, so the retry
    // collapses to the generic invalid-ceremony error.
    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/register/finish",
        json!({ "ceremony_id": ceremony_id, "response": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_CEREMONY");
}

#[tokio::test]
async fn test_second_start_supersedes_first_over_http() {
    let app = create_test_app();

    let (_, first) = send_json(
        &app,
        "POST",
        "/ceremony/register/start",
        json!({ "username": "alice" }),
    )
    .await;
    let (_, second) = send_json(
        &app,
        "POST",
        "/ceremony/register/start",
        json!({ "username": "alice" }),
    )
    .await;

    // Finishing the superseded ceremony fails before verification runs
    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/register/finish",
        json!({ "ceremony_id": first["ceremony_id"], "response": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SUPERSEDED");

    // The latest attempt still reaches verification
    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/register/finish",
        json!({ "ceremony_id": second["ceremony_id"], "response": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "VERIFICATION_FAILED");
}

#[tokio::test]
async fn test_registration_and_authentication_do_not_supersede_each_other() {
    let app = create_test_app();

    let (_, registration) = send_json(
        &app,
        "POST",
        "/ceremony/register/start",
        json!({ "username": "alice" }),
    )
    .await;
    let (_, _auth) = send_json(&app, "POST", "/ceremony/auth/start", json!({})).await;

    // The registration ceremony is still live (fails on crypto, not on
    // supersession)
    let (status, body) = send_json(
        &app,
        "POST",
        "/ceremony/register/finish",
        json!({ "ceremony_id": registration["ceremony_id"], "response": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "VERIFICATION_FAILED");
}

// ============================================================================
// Credential Management Tests
// ============================================================================

#[tokio::test]
async fn test_list_credentials_empty() {
    let app = create_test_app();

    let (status, body) = get(&app, "/subjects/alice/credentials").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credentials"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_revoke_unknown_credential_returns_404() {
    let app = create_test_app();

    let (status, body) = send_json(&app, "DELETE", "/credentials/nope", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
