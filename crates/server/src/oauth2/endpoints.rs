//! OAuth2 HTTP endpoints.
//!
//! Thin adapters over [`AuthorizationEngine`](crate::oauth2::AuthorizationEngine):
//! - Authorization endpoint
//! - Token endpoint
//! - Token revocation and introspection
//! - UserInfo (OpenID Connect)
//! - Discovery document

use crate::error::{AuthError, ErrorResponse};
use crate::oauth2::engine::ClientCredentials;
use crate::oauth2::introspection::{Introspection, TokenTypeHint};
use crate::oauth2::session_cookie;
use crate::oauth2::types::{AuthenticatedUser, AuthorizationRequest, IssuedTokens};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{OriginalUri, Query, State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(introspect))
        .routes(routes!(userinfo))
        .merge(super::login::router())
        .with_state(state)
}

/// Discovery lives at the server root, outside the `/oauth2` prefix.
pub fn discovery_router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(openid_configuration))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// OAuth2 authorization request parameters.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    /// Must be "code" for Authorization Code flow
    pub response_type: String,
    /// Client identifier issued during registration
    pub client_id: String,
    /// Redirect URI (must match a registered URI exactly)
    pub redirect_uri: Option<String>,
    /// Space-separated list of requested scopes
    pub scope: Option<String>,
    /// Opaque value for CSRF protection
    pub state: Option<String>,
    /// String for replay protection (included in ID token)
    pub nonce: Option<String>,
    /// PKCE code challenge (base64url-encoded)
    pub code_challenge: Option<String>,
    /// PKCE method: "S256" or "plain"
    pub code_challenge_method: Option<String>,
}

impl From<AuthorizeRequest> for AuthorizationRequest {
    fn from(params: AuthorizeRequest) -> Self {
        AuthorizationRequest {
            client_id: params.client_id,
            redirect_uri: params.redirect_uri,
            scope: params.scope,
            response_type: params.response_type,
            state: params.state,
            nonce: params.nonce,
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        TokenResponse {
            access_token: tokens.access_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
            refresh_token: tokens.refresh_token,
            scope: tokens.scopes.to_string(),
            id_token: tokens.id_token,
        }
    }
}

/// Revocation and introspection share the same form.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenLookupRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the OAuth2 authorization code flow",
    description = "Validates the client, redirect URI and scopes, then issues a single-use authorization code \
                   and redirects back to the client's redirect_uri with `code` and `state`.\n\n\
                   Users without a login session are redirected to the login page first; the original \
                   request is carried in the `continue` parameter.\n\n\
                   **PKCE:** required for public clients. S256 is recommended.",
    params(
        ("response_type" = String, Query, description = "OAuth2 response type. Must be `code`."),
        ("client_id" = String, Query, description = "The client identifier issued during client registration."),
        ("redirect_uri" = Option<String>, Query, description = "Must exactly match a registered redirect URI."),
        ("scope" = Option<String>, Query, description = "Space-separated list of requested scopes."),
        ("state" = Option<String>, Query, description = "Opaque value returned unchanged in the redirect."),
        ("nonce" = Option<String>, Query, description = "Included in the ID token if provided."),
        ("code_challenge" = Option<String>, Query, description = "PKCE code challenge."),
        ("code_challenge_method" = Option<String>, Query, description = "PKCE challenge method, `S256` or `plain`."),
    ),
    responses(
        (status = 303, description = "Redirect to the client with a code or an error, or to the login page"),
        (status = 400, description = "Unknown client or unregistered redirect_uri", body = ErrorResponse),
        (status = 401, description = "Client is disabled or unknown", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    OriginalUri(original_uri): OriginalUri,
    headers: HeaderMap,
    Query(params): Query<AuthorizeRequest>,
) -> Response {
    let request = AuthorizationRequest::from(params);

    let user = match session_cookie(&headers) {
        Some(sid) => match state.sessions.resolve(sid).await {
            Ok(user_id) => user_id.map(AuthenticatedUser::new),
            Err(e) => return e.into_response(),
        },
        None => None,
    };

    match state
        .engine
        .start_authorization(&request, user.as_ref())
        .await
    {
        Ok(grant) => {
            let mut location = match url::Url::parse(&grant.redirect_uri) {
                Ok(u) => u,
                Err(_) => return AuthError::InvalidRedirect.into_response(),
            };
            location.query_pairs_mut().append_pair("code", &grant.code);
            if let Some(s) = &grant.state {
                location.query_pairs_mut().append_pair("state", s);
            }
            Redirect::to(location.as_str()).into_response()
        }
        Err(AuthError::UnauthenticatedUser) => {
            let login_url = format!(
                "{}?continue={}",
                state.login_url,
                urlencoding::encode(&original_uri.to_string())
            );
            Redirect::to(&login_url).into_response()
        }
        Err(e) if e.is_redirectable() => {
            error_redirect(request.redirect_uri.as_deref(), request.state.as_deref(), e)
        }
        Err(e) => e.into_response(),
    }
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, form), fields(grant_type = tracing::field::Empty))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Issue tokens for an authorization code, refresh token or client credentials",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: exchange a code for an access token and refresh token\n\
                   - `refresh_token`: rotate a refresh token; the presented token becomes unusable\n\
                   - `client_credentials`: access token for a confidential client, no refresh token\n\n\
                   **Client authentication:** HTTP Basic, or `client_id`/`client_secret` in the body. \
                   Public clients send only `client_id`.\n\n\
                   Reusing a consumed code or a rotated refresh token revokes every token of that grant.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued successfully", body = TokenResponse),
        (status = 400, description = "Invalid request, grant or scope", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 429, description = "Too many token requests for this client", body = ErrorResponse),
        (status = 503, description = "Session storage unavailable", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let params = match parse_form(form) {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };
    tracing::Span::current().record("grant_type", params.grant_type.as_str());
    match issue_tokens(&state, &headers, &params).await {
        Ok(tokens) => {
            let mut response = Json(TokenResponse::from(tokens)).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        Err(e) => e.into_response(),
    }
}

async fn issue_tokens(
    state: &OAuth2State,
    headers: &HeaderMap,
    params: &TokenRequest,
) -> Result<IssuedTokens, AuthError> {
    let (client_id, client_secret) =
        extract_client_credentials(headers, params.client_id.as_deref(), params.client_secret.as_deref());
    let client_id = client_id.ok_or(AuthError::InvalidRequest("client_id is required"))?;
    let credentials = ClientCredentials {
        client_id: &client_id,
        client_secret: client_secret.as_deref(),
    };

    match params.grant_type.as_str() {
        "authorization_code" => {
            let code = params
                .code
                .as_deref()
                .ok_or(AuthError::InvalidRequest("code is required"))?;
            let redirect_uri = params
                .redirect_uri
                .as_deref()
                .ok_or(AuthError::InvalidRequest("redirect_uri is required"))?;
            state
                .engine
                .exchange_code(code, credentials, redirect_uri, params.code_verifier.as_deref())
                .await
        }
        "refresh_token" => {
            let refresh_token = params
                .refresh_token
                .as_deref()
                .ok_or(AuthError::InvalidRequest("refresh_token is required"))?;
            state
                .engine
                .refresh_token(refresh_token, credentials, params.scope.as_deref())
                .await
        }
        "client_credentials" => {
            state
                .engine
                .client_credentials_grant(credentials, params.scope.as_deref())
                .await
        }
        _ => Err(AuthError::UnsupportedGrantType),
    }
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Implements RFC 7009. Revoking a refresh token revokes every token of its grant, \
                   including access tokens already issued. Revoking an access token deny-lists it \
                   until it expires.\n\n\
                   Returns 200 OK for unknown or already revoked tokens. `token_type_hint` only changes \
                   the lookup order; unknown hints are ignored.",
    request_body(
        content = TokenLookupRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 400, description = "Malformed form body", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> Response {
    let params = match parse_form(form) {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };
    let (client_id, client_secret) =
        extract_client_credentials(&headers, params.client_id.as_deref(), params.client_secret.as_deref());
    let Some(client_id) = client_id else {
        return AuthError::InvalidClient.into_response();
    };
    let credentials = ClientCredentials {
        client_id: &client_id,
        client_secret: client_secret.as_deref(),
    };
    let hint = TokenTypeHint::parse(params.token_type_hint.as_deref());

    match state.engine.revoke(credentials, &params.token, hint).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Token introspection endpoint (RFC 7662).
#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/introspect",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Introspect Token",
    summary = "Check whether a token is active",
    description = "Implements RFC 7662 for authenticated clients. Inactive, revoked, expired and unknown \
                   tokens all yield `{\"active\": false}`.",
    request_body(
        content = TokenLookupRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token introspection request"
    ),
    responses(
        (status = 200, description = "Introspection result", body = Introspection),
        (status = 400, description = "Malformed form body", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn introspect(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> Response {
    let params = match parse_form(form) {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };
    let (client_id, client_secret) =
        extract_client_credentials(&headers, params.client_id.as_deref(), params.client_secret.as_deref());
    let Some(client_id) = client_id else {
        return AuthError::InvalidClient.into_response();
    };
    let credentials = ClientCredentials {
        client_id: &client_id,
        client_secret: client_secret.as_deref(),
    };
    let hint = TokenTypeHint::parse(params.token_type_hint.as_deref());

    match state.engine.introspect(credentials, &params.token, hint).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

/// OpenID Connect UserInfo endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Get authenticated user's profile information",
    description = "Returns claims about the user behind an access token with the `openid` scope.\n\n\
                   **Returned claims depend on granted scopes:**\n\
                   - `openid`: `sub`\n\
                   - `email`: `email`\n\
                   - `profile`: `name`",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User profile information", body = UserInfoResponse),
        (status = 401, description = "Missing, invalid or revoked access token", body = ErrorResponse),
        (status = 403, description = "Token does not have the `openid` scope", body = ErrorResponse),
    )
)]
pub async fn userinfo(State(state): State<OAuth2State>, headers: HeaderMap) -> Response {
    let Some(access_token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return AuthError::InvalidToken.into_response();
    };

    match state.engine.userinfo(access_token).await {
        Ok((claims, user)) => {
            let response = UserInfoResponse {
                sub: user.id,
                email: claims.scope.contains("email").then_some(user.identifier),
                name: if claims.scope.contains("profile") {
                    user.name
                } else {
                    None
                },
            };
            Json(response).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Metadata about this provider: endpoint URLs, supported grant and response types, \
                   scopes, client authentication methods and PKCE methods.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    let base = state.issuer_url.trim_end_matches('/');
    Json(OpenIdConfiguration {
        issuer: state.issuer_url.clone(),
        authorization_endpoint: format!("{base}/oauth2/authorize"),
        token_endpoint: format!("{base}/oauth2/token"),
        userinfo_endpoint: format!("{base}/oauth2/userinfo"),
        revocation_endpoint: format!("{base}/oauth2/revoke"),
        introspection_endpoint: format!("{base}/oauth2/introspect"),
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
            "client_credentials".to_string(),
        ],
        subject_types_supported: vec!["public".to_string()],
        scopes_supported: vec![
            "openid".to_string(),
            "profile".to_string(),
            "email".to_string(),
        ],
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
            "none".to_string(),
        ],
        code_challenge_methods_supported: vec!["S256".to_string(), "plain".to_string()],
        id_token_signing_alg_values_supported: vec!["HS256".to_string()],
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Form bodies that fail to deserialize become `invalid_request` without
/// echoing the deserializer message.
pub(crate) fn parse_form<T>(form: Result<Form<T>, FormRejection>) -> Result<T, AuthError> {
    match form {
        Ok(Form(params)) => Ok(params),
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "rejected form body");
            Err(AuthError::InvalidRequest("malformed or incomplete form body"))
        }
    }
}

/// Client credentials from HTTP Basic auth, falling back to the form body.
fn extract_client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> (Option<String>, Option<String>) {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth)
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        // RFC 6749 §2.3.1: both parts are form-urlencoded
        return (Some(form_decode(id)), Some(form_decode(secret)));
    }

    (
        form_client_id.map(str::to_string),
        form_client_secret.map(str::to_string),
    )
}

/// `application/x-www-form-urlencoded` decoding: `+` is a space.
fn form_decode(value: &str) -> String {
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

fn error_redirect(redirect_uri: Option<&str>, state: Option<&str>, error: AuthError) -> Response {
    let Some(mut redirect_url) = redirect_uri.and_then(|uri| url::Url::parse(uri).ok()) else {
        return error.into_response();
    };

    redirect_url
        .query_pairs_mut()
        .append_pair("error", error.error_code())
        .append_pair("error_description", &error.to_string());
    if let Some(s) = state {
        redirect_url.query_pairs_mut().append_pair("state", s);
    }

    Redirect::to(redirect_url.as_str()).into_response()
}
