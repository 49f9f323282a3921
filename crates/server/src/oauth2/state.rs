//! OAuth2 state management.
//!
//! Provides the state shared by the authorization server's HTTP handlers.

use crate::oauth2::engine::AuthorizationEngine;
use crate::session::LoginSessions;
use std::sync::Arc;

/// OAuth2 state containing all components needed for the authorization server.
#[derive(Clone)]
pub struct OAuth2State {
    pub engine: Arc<AuthorizationEngine>,
    pub sessions: LoginSessions,
    /// Base URL for the OAuth2 server (used for issuer in tokens)
    pub issuer_url: String,
    /// Where unauthenticated authorization requests are sent.
    pub login_url: String,
}

impl OAuth2State {
    pub fn new(
        engine: Arc<AuthorizationEngine>,
        sessions: LoginSessions,
        issuer_url: impl Into<String>,
        login_url: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            sessions,
            issuer_url: issuer_url.into(),
            login_url: login_url.into(),
        }
    }
}
