//! An OAuth2 / OpenID Connect identity provider.
//!
//! Issues single-use authorization codes, rotating refresh tokens and signed
//! access tokens. Reuse of a code or a rotated refresh token revokes every
//! token descended from the same authorization.

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;
pub mod session;
pub mod store;
pub mod token;
