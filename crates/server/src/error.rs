//! Error taxonomy.
//!
//! [`StorageError`] is what adapters (session cache, client registry,
//! credential store) return. [`AuthError`] is the protocol-level error the
//! engine returns and the HTTP layer renders as `{error, error_description}`.

use crate::token::TokenError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored value could not be decoded: {0}")]
    Serialization(String),
    #[error("Storage unavailable during {0}")]
    Unavailable(&'static str),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Backend(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<sea_orm::DbErr> for StorageError {
    fn from(e: sea_orm::DbErr) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Protocol error returned by the authorization engine.
///
/// The `&'static str` payloads are public descriptions; they never carry
/// internal state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("client authentication failed")]
    InvalidClient,
    #[error("redirect_uri is not registered for this client")]
    InvalidRedirect,
    #[error("requested scope is invalid or exceeds the granted scope")]
    InvalidScope,
    #[error("invalid grant: {0}")]
    InvalidGrant(&'static str),
    #[error("client is not authorized to use this grant type")]
    UnauthorizedClient,
    #[error("grant type is not supported")]
    UnsupportedGrantType,
    #[error("response type is not supported")]
    UnsupportedResponseType,
    #[error("user authentication is required")]
    UnauthenticatedUser,
    #[error("access token is invalid")]
    InvalidToken,
    #[error("access token lacks the required scope")]
    InsufficientScope,
    #[error("too many requests")]
    RateLimited,
    #[error("storage temporarily unavailable")]
    StorageUnavailable,
    #[error("internal server error")]
    ServerError,
}

impl AuthError {
    /// RFC 6749 / RFC 6750 error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest(_) | AuthError::InvalidRedirect => "invalid_request",
            AuthError::InvalidClient => "invalid_client",
            AuthError::InvalidScope => "invalid_scope",
            AuthError::InvalidGrant(_) => "invalid_grant",
            AuthError::UnauthorizedClient => "unauthorized_client",
            AuthError::UnsupportedGrantType => "unsupported_grant_type",
            AuthError::UnsupportedResponseType => "unsupported_response_type",
            AuthError::UnauthenticatedUser => "login_required",
            AuthError::InvalidToken => "invalid_token",
            AuthError::InsufficientScope => "insufficient_scope",
            AuthError::RateLimited => "rate_limited",
            AuthError::StorageUnavailable => "temporarily_unavailable",
            AuthError::ServerError => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidClient | AuthError::UnauthenticatedUser | AuthError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::InsufficientScope => StatusCode::FORBIDDEN,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the error may be reported to the client by redirecting to its
    /// (already validated) redirect URI.
    pub fn is_redirectable(&self) -> bool {
        !matches!(
            self,
            AuthError::InvalidClient | AuthError::InvalidRedirect | AuthError::UnauthenticatedUser
        )
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: Some(self.to_string()),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        tracing::error!(error = %e, "storage failure surfaced to protocol layer");
        AuthError::StorageUnavailable
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        tracing::error!(error = %e, "token codec failure");
        AuthError::ServerError
    }
}

/// OAuth2 error body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error code (e.g. `invalid_grant`)
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(self.to_response_body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        match self {
            AuthError::InvalidClient => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"oauth2\""),
                );
            }
            AuthError::InvalidToken => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            _ => {}
        }
        response
    }
}
