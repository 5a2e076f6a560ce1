//! HTTP middleware integration tests
//!
//! Drives an axum router protected by the shield with `tower::ServiceExt`
//! and checks the wire-level behaviour of every mode.

use a3s_shield::{ConfigPatch, Context, IncidentKind, MemorySink, Mode, Shield};
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Echo what the handler actually received
async fn echo(request: Request) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_else(|_| Bytes::new());
    Json(json!({
        "query": parts.uri.query().unwrap_or(""),
        "cookie": parts
            .headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        "contentLength": parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        "body": String::from_utf8_lossy(&bytes),
    }))
}

fn app(shield: &Shield) -> Router {
    shield.http().protect(
        Router::new()
            .route("/api", get(echo).post(echo))
            .route("/form", post(echo)),
    )
}

fn shield(mode: Mode) -> (Shield, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let shield = Shield::new();
    shield
        .configure(ConfigPatch::new().mode(mode).sink(sink.clone()))
        .unwrap();
    (shield, sink)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ─── Reject ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_reject_token_in_query() {
    let (shield, sink) = shield(Mode::Reject);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .uri("/api?token=abc&page=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "TOKEN_IN_QUERY");
    assert_eq!(json["context"], "query");
    assert!(json["message"].is_string());
    assert!(!json.to_string().contains("abc"));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, IncidentKind::ForbiddenKey);
    assert_eq!(events[0].meta.path.as_deref(), Some("/api"));
    assert_eq!(events[0].meta.method.as_deref(), Some("GET"));
}

#[tokio::test]
async fn test_reject_token_in_header() {
    let (shield, _) = shield(Mode::Reject);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .uri("/api")
                .header("X-Auth-Token", "a")
                .header("JWT", "b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "TOKEN_IN_HEADERS");
}

#[tokio::test]
async fn test_reject_token_in_json_body() {
    let (shield, _) = shield(Mode::Reject);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"user":"bob","refresh_token":"r"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "TOKEN_IN_BODY");
}

#[tokio::test]
async fn test_reject_token_in_cookies() {
    let (shield, _) = shield(Mode::Reject);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .uri("/api")
                .header(header::COOKIE, "theme=dark; sess_token=s")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "TOKEN_IN_COOKIES");
}

#[tokio::test]
async fn test_reject_stops_at_first_context() {
    let (shield, sink) = shield(Mode::Reject);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api?token=a")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, "jwt=c")
                .body(Body::from(r#"{"id_token":"b"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(body_json(response).await["error"], "TOKEN_IN_QUERY");
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_clean_request_admitted_unchanged() {
    let (shield, sink) = shield(Mode::Reject);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api?tokenized=1")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["query"], "tokenized=1");
    assert_eq!(json["body"], r#"{"name":"x"}"#);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_disabled_context_not_scanned() {
    let (shield, _) = shield(Mode::Reject);
    shield
        .configure(ConfigPatch::new().context(Context::Query, false))
        .unwrap();
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .uri("/api?token=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// ─── Sanitize ────────────────────────────────────────────────────

#[tokio::test]
async fn test_sanitize_rewrites_forwarded_request() {
    let (shield, sink) = shield(Mode::Sanitize);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api?page=2&access_token=abc")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, "theme=dark; jwt=xyz")
                .body(Body::from(r#"{"user":"bob","token":"secret"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["query"], "page=2&access_token=%5BREDACTED_TOKEN%5D");
    assert_eq!(json["cookie"], "theme=dark; jwt=[REDACTED_TOKEN]");

    let body: Value = serde_json::from_str(json["body"].as_str().unwrap()).unwrap();
    assert_eq!(body, json!({"user": "bob", "token": "[REDACTED_TOKEN]"}));
    assert_eq!(
        json["contentLength"],
        json["body"].as_str().unwrap().len().to_string()
    );
    assert!(!json.to_string().contains("secret"));
    assert_eq!(sink.len(), 3);
}

#[tokio::test]
async fn test_sanitize_form_body() {
    let (shield, _) = shield(Mode::Sanitize);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/form")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("a=1&auth_token=xyz"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["body"],
        "a=1&auth_token=%5BREDACTED_TOKEN%5D"
    );
}

#[tokio::test]
async fn test_sanitize_never_rewrites_headers() {
    let (shield, sink) = shield(Mode::Sanitize);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .uri("/api")
                .header("token", "abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].context, Context::Headers);
}

// ─── Monitor ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_monitor_admits_unmodified() {
    let (shield, sink) = shield(Mode::Monitor);
    let response = app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api?token=abc")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"jwt":"x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["query"], "token=abc");
    assert_eq!(json["body"], r#"{"jwt":"x"}"#);
    assert_eq!(sink.len(), 2);
}

// ─── Limits & live configuration ─────────────────────────────────

fn limited_app(shield: &Shield) -> Router {
    shield
        .http()
        .with_body_limit(16)
        .protect(Router::new().route("/api", post(echo)))
}

fn oversized(content_type: &str) -> Request {
    Request::builder()
        .method("POST")
        .uri("/api")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(vec![b'a'; 64]))
        .unwrap()
}

#[tokio::test]
async fn test_oversized_scannable_body_rejected() {
    let (shield, sink) = shield(Mode::Reject);
    let response = limited_app(&shield)
        .oneshot(oversized("application/json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"], "BODY_NOT_INSPECTABLE");

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, IncidentKind::Error);
    assert_eq!(events[0].context, Context::Body);
    assert_eq!(events[0].detail.as_deref(), Some("body_too_large"));
}

#[tokio::test]
async fn test_oversized_declared_length_rejected_in_sanitize() {
    let (shield, _) = shield(Mode::Sanitize);
    let response = limited_app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::CONTENT_LENGTH, "64")
                .body(Body::from(vec![b'a'; 64]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_oversized_body_forwarded_in_monitor() {
    let (shield, sink) = shield(Mode::Monitor);
    let response = limited_app(&shield)
        .oneshot(oversized("application/json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["body"], "a".repeat(64));
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].kind, IncidentKind::Error);
}

#[tokio::test]
async fn test_oversized_opaque_body_streams_through() {
    let (shield, sink) = shield(Mode::Reject);
    let response = limited_app(&shield)
        .oneshot(oversized("application/octet-stream"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["body"], "a".repeat(64));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_oversized_body_with_body_context_disabled() {
    let (shield, sink) = shield(Mode::Reject);
    shield
        .configure(ConfigPatch::new().context(Context::Body, false))
        .unwrap();
    let response = limited_app(&shield)
        .oneshot(oversized("application/json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_unbuffered_body_still_checks_query() {
    let (shield, _) = shield(Mode::Reject);
    let response = limited_app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api?jwt=abc")
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::from(vec![b'a'; 64]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "TOKEN_IN_QUERY");
}

#[tokio::test]
async fn test_sanitize_query_with_unbuffered_body() {
    let (shield, _) = shield(Mode::Sanitize);
    let response = limited_app(&shield)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api?a=1&token=abc")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["query"], "a=1&token=%5BREDACTED_TOKEN%5D");
    assert_eq!(json["body"], "hello");
}

#[tokio::test]
async fn test_mode_change_applies_to_running_router() {
    let (shield, _) = shield(Mode::Reject);
    let app = app(&shield);

    let request = || {
        Request::builder()
            .uri("/api?token=abc")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    shield
        .configure(ConfigPatch::new().mode(Mode::Monitor))
        .unwrap();
    let response = app.oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
