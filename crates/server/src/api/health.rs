//! Health check endpoints.

use crate::oauth2::OAuth2State;
use axum::{extract::State, http::StatusCode};

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

/// Health check endpoint.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    description = "Returns a simple health status indicating the service is running and accepting requests.\n\n\
                   **Use cases:**\n\
                   - Kubernetes liveness probes\n\
                   - Load balancer health checks\n\n\
                   Supports both GET and HEAD methods for compatibility with various health check systems.",
    responses(
        (status = 200, description = "Service is healthy", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness check: the session cache must answer.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/readyz",
    tag = MISC_TAG,
    operation_id = "Readiness Check",
    summary = "Service readiness check",
    description = "Pings the session cache. Without it no code or refresh token can be issued, \
                   so the instance reports itself unavailable.",
    responses(
        (status = 200, description = "Session cache reachable", body = str, content_type = "text/plain", example = "ok"),
        (status = 503, description = "Session cache unreachable", body = str, content_type = "text/plain"),
    )
)]
pub async fn ready(State(state): State<OAuth2State>) -> (StatusCode, &'static str) {
    match state.engine.cache().health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "session cache health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}
