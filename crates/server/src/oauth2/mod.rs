//! OAuth2 Authorization Server module.
//!
//! The [`AuthorizationEngine`] owns every grant decision; the HTTP handlers in
//! [`endpoints`] and [`login`] only translate requests and responses.
//!
//! ## Supported Flows
//!
//! - Authorization Code (PKCE required for public clients)
//! - Refresh Token with rotation and reuse detection
//! - Client Credentials
//!
//! ## Endpoints
//!
//! - `GET /oauth2/authorize` - Authorization endpoint
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation
//! - `POST /oauth2/introspect` - Token introspection
//! - `GET /oauth2/userinfo` - OpenID Connect UserInfo
//! - `POST /oauth2/login`, `POST /oauth2/logout` - Login session
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery

pub mod endpoints;
pub mod engine;
pub mod introspection;
pub mod login;
pub mod password;
pub mod pkce;
pub mod rate_limit;
mod state;
pub mod types;

pub use endpoints::router;
pub use engine::{AuthorizationEngine, ClientCredentials, EngineSettings};
pub use introspection::{Introspection, TokenTypeHint};
pub use login::session_cookie;
pub use password::{hash_password, verify_password};
pub use rate_limit::{FixedWindowRateLimiter, NoopRateLimiter, RateLimiter};
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
