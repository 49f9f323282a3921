//! Login endpoints.
//!
//! Authenticates the resource owner and binds the result to an
//! `idp_session` cookie that `/authorize` resolves on the next request.

use crate::error::{AuthError, ErrorResponse};
use crate::oauth2::endpoints::parse_form;
use crate::oauth2::state::OAuth2State;
use crate::session::SESSION_COOKIE;
use axum::{
    Form,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Form data for login submission.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    /// Relative URL to resume after login, usually the original `/authorize` request.
    #[serde(rename = "continue")]
    pub continue_to: Option<String>,
}

/// Creates the login router.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(login_submit))
        .routes(routes!(logout))
}

/// Handle login form submission.
#[tracing::instrument(skip(state, form), fields(email = tracing::field::Empty))]
#[utoipa::path(
    post,
    path = "/login",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Login Submit",
    summary = "Submit login credentials",
    description = "Authenticates the user with email and password and starts a login session.\n\n\
                   On success the `idp_session` cookie is set and the browser is redirected to `continue`. \
                   Only relative paths on this server are followed; anything else redirects to `/`.",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Login credentials"
    ),
    responses(
        (status = 303, description = "Login session created"),
        (status = 400, description = "Malformed form body", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse),
    )
)]
async fn login_submit(
    State(state): State<OAuth2State>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let form = match parse_form(form) {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    let email = form.email.trim().to_lowercase();
    tracing::Span::current().record("email", email.as_str());
    if email.is_empty() || form.password.is_empty() {
        return AuthError::UnauthenticatedUser.into_response();
    }

    let user = match state.engine.authenticate_user(&email, &form.password).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let sid = match state.sessions.create(&user.id).await {
        Ok(sid) => sid,
        Err(e) => return e.into_response(),
    };
    tracing::info!(user_id = %user.id, "login session started");

    let cookie = format!(
        "{SESSION_COOKIE}={sid}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        state.sessions.ttl().as_secs()
    );
    let target = form
        .continue_to
        .as_deref()
        .filter(|c| is_local_path(c))
        .unwrap_or("/");

    let mut response = Redirect::to(target).into_response();
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
            response
        }
        Err(_) => AuthError::ServerError.into_response(),
    }
}

/// End the current login session.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    post,
    path = "/logout",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Logout",
    summary = "End the login session",
    description = "Deletes the login session named by the `idp_session` cookie and clears the cookie. \
                   Tokens already issued are not affected.",
    responses(
        (status = 204, description = "Session ended"),
    )
)]
async fn logout(State(state): State<OAuth2State>, headers: HeaderMap) -> Response {
    if let Some(sid) = session_cookie(&headers)
        && let Err(e) = state.sessions.end(sid).await
    {
        return e.into_response();
    }
    (
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"),
        )],
    )
        .into_response()
}

/// Extract the login session id from the `Cookie` header.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Open redirect guard: a single leading slash, no scheme, no authority.
fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}
