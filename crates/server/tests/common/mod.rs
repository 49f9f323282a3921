//! Shared fixtures: an engine wired to in-memory adapters.
#![allow(dead_code)]

use rust_identity_provider::oauth2::password::sha256_secret_digest;
use rust_identity_provider::oauth2::types::{Client, GrantType, Scopes, User, UserStatus};
use rust_identity_provider::oauth2::{AuthorizationEngine, EngineSettings};
use rust_identity_provider::session::MemorySessionCache;
use rust_identity_provider::store::{MemoryClientRegistry, MemoryCredentialStore};
use rust_identity_provider::token::{KeyManager, TokenCodec};
use std::sync::Arc;

pub const ISSUER: &str = "https://idp.test";
pub const C1_SECRET: &str = "c1-secret";
pub const SVC_SECRET: &str = "svc-secret";
pub const U1_EMAIL: &str = "u1@example.com";
pub const U1_PASSWORD: &str = "correct horse battery staple";
pub const PKCE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const PKCE_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

pub struct Fixture {
    pub engine: Arc<AuthorizationEngine>,
    pub clients: MemoryClientRegistry,
    pub users: MemoryCredentialStore,
    pub cache: MemorySessionCache,
}

fn client(
    id: &str,
    secret: Option<&str>,
    redirect_uris: &[&str],
    grants: &[GrantType],
    scopes: &str,
) -> Client {
    Client {
        client_id: id.to_string(),
        name: id.to_uppercase(),
        secret_hash: secret.map(sha256_secret_digest),
        redirect_uris: redirect_uris.iter().map(|u| u.to_string()).collect(),
        grant_types: grants.iter().copied().collect(),
        scopes: Scopes::parse(scopes),
        require_pkce: false,
        enabled: true,
        access_token_ttl: None,
    }
}

pub fn codec() -> TokenCodec {
    let keys = KeyManager::new(
        "k1",
        [("k1", "test-signing-secret-0123456789abcdef")],
    )
    .expect("keys");
    TokenCodec::new(Arc::new(keys), ISSUER)
}

/// Clients:
/// - `c1`: confidential, authorization code + refresh, redirect `https://app/cb`
/// - `spa`: public, authorization code + refresh, redirect `https://spa/cb`
/// - `svc`: confidential, client credentials only
///
/// User `u1` is active with password [`U1_PASSWORD`].
pub fn fixture_with(settings: EngineSettings) -> Fixture {
    let clients = MemoryClientRegistry::new();
    clients.insert(client(
        "c1",
        Some(C1_SECRET),
        &["https://app/cb"],
        &[GrantType::AuthorizationCode, GrantType::RefreshToken],
        "openid email profile read write",
    ));
    clients.insert(client(
        "spa",
        None,
        &["https://spa/cb"],
        &[GrantType::AuthorizationCode, GrantType::RefreshToken],
        "openid read",
    ));
    clients.insert(client(
        "svc",
        Some(SVC_SECRET),
        &[],
        &[GrantType::ClientCredentials],
        "read write",
    ));

    let users = MemoryCredentialStore::new(3);
    users
        .insert_user(
            User {
                id: "u1".to_string(),
                identifier: U1_EMAIL.to_string(),
                name: Some("User One".to_string()),
                status: UserStatus::Active,
            },
            U1_PASSWORD,
        )
        .expect("hash password");

    let cache = MemorySessionCache::new();
    let engine = AuthorizationEngine::new(
        Arc::new(clients.clone()),
        Arc::new(users.clone()),
        Arc::new(cache.clone()),
        codec(),
        settings,
    );

    Fixture {
        engine: Arc::new(engine),
        clients,
        users,
        cache,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(EngineSettings::default())
}
