//! Database entities.

pub mod oauth2_client;
pub mod oauth2_user;
