//! Router-level tests that never reach the database.
//!
//! The pool points at an unreachable address; every request here is
//! answered by routing, extractors or validation before a connection
//! would be checked out.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use pinpoint_server::config::AppConfig;
use pinpoint_server::routes::Claims;
use pinpoint_server::{build_router, AppState};
use serde_json::Value;
use tower::util::ServiceExt;

const SECRET: &str = "test-secret";

fn setup_app() -> Router {
    let config = AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://pinpoint@127.0.0.1:1/pinpoint_test".to_string()),
        "JWT_SECRET" => Some(SECRET.to_string()),
        "PUBLIC_URL" => Some("http://pinpoint.test".to_string()),
        _ => None,
    })
    .expect("test config");
    let state = AppState::new(config).expect("test state");
    build_router(Arc::new(state))
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

fn token(exp_offset_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: "tech@example.com".into(),
        name: "Tech".into(),
        user_id: 7,
        exp: (now + exp_offset_secs) as usize,
        iat: now as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let response = setup_app().oneshot(request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn me_without_token_is_unauthorized() {
    let response = setup_app().oneshot(request("GET", "/auth/me")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn expired_token_clears_cookie() {
    let response = setup_app()
        .oneshot(
            Request::builder()
                .uri("/auth/me")
                .header(header::COOKIE, format!("token={}", token(-3600)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(cookie.starts_with("token=;"));
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn token_signed_with_other_secret_is_rejected() {
    let forged = encode(
        &Header::default(),
        &Claims {
            sub: "intruder@example.com".into(),
            name: "Intruder".into(),
            user_id: 1,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            iat: chrono::Utc::now().timestamp() as usize,
        },
        &EncodingKey::from_secret(b"not-the-secret"),
    )
    .unwrap();
    let response = setup_app()
        .oneshot(
            Request::builder()
                .uri("/api/issues")
                .header(header::AUTHORIZATION, format!("Bearer {forged}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn organization_routes_require_auth() {
    for uri in ["/api/issues", "/api/machines", "/api/notifications", "/api/activity"] {
        let response = setup_app().oneshot(request("GET", uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn issue_writes_require_auth() {
    let writes = [
        ("POST", "/api/issues"),
        ("PATCH", "/api/issues/MM-01"),
        ("POST", "/api/issues/MM-01/status"),
        ("POST", "/api/issues/MM-01/assign"),
        ("PATCH", "/api/organization"),
    ];
    for (method, uri) in writes {
        let response = setup_app()
            .oneshot(json_request(method, uri, &serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
    }
}

#[tokio::test]
async fn logout_clears_cookie() {
    let response = setup_app().oneshot(request("POST", "/auth/logout")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::SET_COOKIE));
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "logged out");
}

#[tokio::test]
async fn short_links_redirect() {
    let response = setup_app().oneshot(request("GET", "/go/MM-07")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/issues/MM-07");

    let response = setup_app().oneshot(request("GET", "/qr/abc123")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/report/abc123");
}

#[tokio::test]
async fn public_report_validates_before_lookup() {
    let response = setup_app()
        .oneshot(json_request(
            "POST",
            "/api/public/qr/abc123/issues",
            &serde_json::json!({ "title": "   ", "severity": "minor" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_api_path_is_json_404() {
    let response = setup_app().oneshot(request("GET", "/api/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
