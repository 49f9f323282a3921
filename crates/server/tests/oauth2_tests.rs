//! OAuth2 endpoint tests.
//!
//! Drives the full HTTP surface through axum-test against in-memory adapters.

mod common;

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use base64::Engine;
use common::*;
use rust_identity_provider::api;
use rust_identity_provider::error::ErrorResponse;
use rust_identity_provider::oauth2::endpoints::{OpenIdConfiguration, TokenResponse, UserInfoResponse};
use rust_identity_provider::oauth2::{Introspection, OAuth2State};
use rust_identity_provider::session::LoginSessions;
use std::sync::Arc;
use std::time::Duration;

fn test_server() -> TestServer {
    let fx = fixture();
    let sessions = LoginSessions::new(Arc::new(fx.cache.clone()), Duration::from_secs(1800));
    let state = OAuth2State::new(fx.engine.clone(), sessions, ISSUER, "/oauth2/login");
    TestServer::new(api::app(state)).expect("create test server")
}

fn basic(client_id: &str, secret: &str) -> HeaderValue {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{secret}"));
    HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
}

fn location(response: &TestResponse) -> url::Url {
    let raw = response.header(header::LOCATION);
    let raw = raw.to_str().unwrap();
    url::Url::parse(raw)
        .or_else(|_| url::Url::parse("http://localhost").unwrap().join(raw))
        .unwrap()
}

fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

async fn login(server: &TestServer) -> String {
    let response = server
        .post("/oauth2/login")
        .form(&[
            ("email", U1_EMAIL),
            ("password", U1_PASSWORD),
            ("continue", "/oauth2/authorize"),
        ])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let cookie = response.header(header::SET_COOKIE);
    let cookie = cookie.to_str().unwrap();
    assert!(cookie.contains("HttpOnly"));
    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("idp_session="))
        .expect("session cookie")
        .to_string()
}

async fn authorize(server: &TestServer, sid: &str, query: &str) -> TestResponse {
    server
        .get(&format!("/oauth2/authorize?{query}"))
        .add_header(
            header::COOKIE,
            HeaderValue::from_str(&format!("idp_session={sid}")).unwrap(),
        )
        .await
}

async fn obtain_code(server: &TestServer, scope: &str) -> String {
    let sid = login(server).await;
    let response = authorize(
        server,
        &sid,
        &format!("response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fapp%2Fcb&scope={scope}&state=xyz"),
    )
    .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let url = location(&response);
    assert_eq!(url.host_str(), Some("app"));
    assert_eq!(query_param(&url, "state").as_deref(), Some("xyz"));
    query_param(&url, "code").expect("code in redirect")
}

async fn exchange(server: &TestServer, code: &str) -> TestResponse {
    server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", "https://app/cb"),
        ])
        .await
}

// =============================================================================
// Misc
// =============================================================================

#[tokio::test]
async fn test_health_and_discovery() {
    let server = test_server();
    server.get("/healthz").await.assert_status_ok();
    server.get("/readyz").await.assert_status_ok();

    let response = server.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();
    let doc: OpenIdConfiguration = response.json();
    assert_eq!(doc.issuer, ISSUER);
    assert_eq!(doc.token_endpoint, format!("{ISSUER}/oauth2/token"));
    assert!(doc.grant_types_supported.contains(&"client_credentials".to_string()));
}

// =============================================================================
// Authorization endpoint
// =============================================================================

#[tokio::test]
async fn test_authorize_without_session_redirects_to_login() {
    let server = test_server();
    let response = server
        .get("/oauth2/authorize?response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fapp%2Fcb&scope=read")
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let url = location(&response);
    assert_eq!(url.path(), "/oauth2/login");
    let resume = query_param(&url, "continue").expect("continue parameter");
    assert!(resume.starts_with("/oauth2/authorize?"));
}

#[tokio::test]
async fn test_authorize_unregistered_redirect_is_not_followed() {
    let server = test_server();
    let sid = login(&server).await;
    let response = authorize(
        &server,
        &sid,
        "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fevil%2Fcb&scope=read",
    )
    .await;
    response.assert_status_bad_request();
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "invalid_request");
}

#[tokio::test]
async fn test_authorize_invalid_scope_redirects_with_error() {
    let server = test_server();
    let sid = login(&server).await;
    let response = authorize(
        &server,
        &sid,
        "response_type=code&client_id=c1&redirect_uri=https%3A%2F%2Fapp%2Fcb&scope=admin&state=s1",
    )
    .await;
    response.assert_status(StatusCode::SEE_OTHER);
    let url = location(&response);
    assert_eq!(query_param(&url, "error").as_deref(), Some("invalid_scope"));
    assert_eq!(query_param(&url, "state").as_deref(), Some("s1"));
    assert!(query_param(&url, "code").is_none());
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let server = test_server();
    let response = server
        .post("/oauth2/login")
        .form(&[("email", U1_EMAIL), ("password", "wrong")])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_ignores_external_continue() {
    let server = test_server();
    let response = server
        .post("/oauth2/login")
        .form(&[
            ("email", U1_EMAIL),
            ("password", U1_PASSWORD),
            ("continue", "https://evil.example/"),
        ])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(response.header(header::LOCATION), "/");
}

// =============================================================================
// Token endpoint
// =============================================================================

#[tokio::test]
async fn test_code_flow_over_http() {
    let server = test_server();
    let code = obtain_code(&server, "read").await;

    let response = exchange(&server, &code).await;
    response.assert_status_ok();
    assert_eq!(response.header(header::CACHE_CONTROL), "no-store");
    let tokens: TokenResponse = response.json();
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.scope, "read");
    assert_eq!(tokens.expires_in, 300);
    assert!(tokens.refresh_token.is_some());

    let replay = exchange(&server, &code).await;
    replay.assert_status_bad_request();
    let body: ErrorResponse = replay.json();
    assert_eq!(body.error, "invalid_grant");

    // The replay took the first access token down with it.
    let introspection: Introspection = server
        .post("/oauth2/introspect")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[("token", tokens.access_token.as_str())])
        .await
        .json();
    assert!(!introspection.active);
}

#[tokio::test]
async fn test_refresh_over_http() {
    let server = test_server();
    let code = obtain_code(&server, "read+write").await;
    let tokens: TokenResponse = exchange(&server, &code).await.json();
    let refresh = tokens.refresh_token.unwrap();

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh.as_str()),
            ("client_id", "c1"),
            ("client_secret", C1_SECRET),
            ("scope", "read"),
        ])
        .await;
    response.assert_status_ok();
    let rotated: TokenResponse = response.json();
    assert_eq!(rotated.scope, "read");
    assert_ne!(rotated.refresh_token.as_deref(), Some(refresh.as_str()));

    let reuse = server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())])
        .await;
    reuse.assert_status_bad_request();
    assert_eq!(reuse.json::<ErrorResponse>().error, "invalid_grant");
}

#[tokio::test]
async fn test_client_credentials_over_http() {
    let server = test_server();

    let wrong = server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("svc", "wrong"))
        .form(&[("grant_type", "client_credentials")])
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.json::<ErrorResponse>().error, "invalid_client");
    assert!(
        wrong
            .header(header::WWW_AUTHENTICATE)
            .to_str()
            .unwrap()
            .starts_with("Basic")
    );

    let response = server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("svc", SVC_SECRET))
        .form(&[("grant_type", "client_credentials"), ("scope", "read")])
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "read");
    assert!(body.get("refresh_token").is_none());
}

#[tokio::test]
async fn test_token_request_errors() {
    let server = test_server();

    let unsupported = server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[("grant_type", "password")])
        .await;
    unsupported.assert_status_bad_request();
    assert_eq!(
        unsupported.json::<ErrorResponse>().error,
        "unsupported_grant_type"
    );

    let missing_code = server
        .post("/oauth2/token")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[("grant_type", "authorization_code"), ("redirect_uri", "https://app/cb")])
        .await;
    missing_code.assert_status_bad_request();
    assert_eq!(missing_code.json::<ErrorResponse>().error, "invalid_request");
}

#[tokio::test]
async fn test_malformed_form_bodies_are_invalid_request() {
    let server = test_server();

    for path in ["/oauth2/token", "/oauth2/revoke", "/oauth2/introspect"] {
        let response = server
            .post(path)
            .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
            .form(&[("client_id", "c1")])
            .await;
        response.assert_status_bad_request();
        let body = response.json::<ErrorResponse>();
        assert_eq!(body.error, "invalid_request", "{path}");
        let description = body.error_description.unwrap_or_default();
        assert!(!description.contains("missing field"), "{path}: {description}");
    }

    let login = server
        .post("/oauth2/login")
        .form(&[("email", U1_EMAIL)])
        .await;
    login.assert_status_bad_request();
    assert_eq!(login.json::<ErrorResponse>().error, "invalid_request");
}

// =============================================================================
// UserInfo, revocation, introspection
// =============================================================================

#[tokio::test]
async fn test_userinfo() {
    let server = test_server();
    let code = obtain_code(&server, "openid+email").await;
    let tokens: TokenResponse = exchange(&server, &code).await.json();
    assert!(tokens.id_token.is_some());

    let response = server
        .get("/oauth2/userinfo")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", tokens.access_token)).unwrap(),
        )
        .await;
    response.assert_status_ok();
    let info: UserInfoResponse = response.json();
    assert_eq!(info.sub, "u1");
    assert_eq!(info.email.as_deref(), Some(U1_EMAIL));
    assert!(info.name.is_none());

    server
        .get("/oauth2/userinfo")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoke_then_introspect() {
    let server = test_server();
    let code = obtain_code(&server, "read").await;
    let tokens: TokenResponse = exchange(&server, &code).await.json();
    let refresh = tokens.refresh_token.unwrap();

    let active: Introspection = server
        .post("/oauth2/introspect")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[("token", refresh.as_str()), ("token_type_hint", "refresh_token")])
        .await
        .json();
    assert!(active.active);
    assert_eq!(active.client_id.as_deref(), Some("c1"));

    server
        .post("/oauth2/revoke")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[("token", refresh.as_str()), ("token_type_hint", "refresh_token")])
        .await
        .assert_status_ok();

    for token in [refresh.as_str(), tokens.access_token.as_str()] {
        let result: Introspection = server
            .post("/oauth2/introspect")
            .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
            .form(&[("token", token)])
            .await
            .json();
        assert!(!result.active);
    }

    // Unknown tokens revoke fine; unauthenticated callers do not.
    server
        .post("/oauth2/revoke")
        .add_header(header::AUTHORIZATION, basic("c1", C1_SECRET))
        .form(&[("token", "unknown")])
        .await
        .assert_status_ok();
    server
        .post("/oauth2/revoke")
        .form(&[("token", "unknown")])
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
