//! The authorization engine: grant state machine and token issuance.
//!
//! Per-request stateless. All durable state lives behind the injected
//! [`ClientRegistry`], [`CredentialStore`] and [`SessionCache`]; the
//! engine's only consistency tools are the cache's compare-and-delete (code
//! consumption) and compare-and-swap (refresh rotation).
//!
//! Authorization code lifecycle:
//! `Requested → CodeIssued → Exchanged → AccessGranted`, or `Expired`, or
//! `Consumed`; presenting a consumed code revokes every token minted from it.
//!
//! Refresh token lifecycle: `Active → Rotated | Revoked | Expired`. Presenting
//! a rotated token is treated as theft and revokes the whole family.

use crate::config::TokenConfig;
use crate::error::{AuthError, StorageError};
use crate::oauth2::password::verify_client_secret;
use crate::oauth2::pkce;
use crate::oauth2::rate_limit::{NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter};
use crate::oauth2::types::{
    AuthenticatedUser, AuthorizationCodeRecord, AuthorizationGrant, AuthorizationRequest, Client,
    GrantType, IssuedTokens, PkceChallenge, PkceMethod, RefreshRecord, RefreshState, Scopes, User,
};
use crate::session::SessionCache;
use crate::store::{ClientRegistry, CredentialStore};
use crate::token::{AccessClaims, IdClaims, TokenCodec, generate_opaque_token, token_digest};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Extra cache lifetime past a record's own expiry, so the engine (not the
/// cache) is what observes expiry.
pub(crate) const EXPIRY_GRACE: Duration = Duration::from_secs(5);

pub(crate) fn code_key(code: &str) -> String {
    format!("code:{code}")
}

pub(crate) fn consumed_key(code: &str) -> String {
    format!("consumed:{code}")
}

pub(crate) fn refresh_key(digest: &str) -> String {
    format!("refresh:{digest}")
}

pub(crate) fn revoked_jti_key(jti: &str) -> String {
    format!("revoked_jti:{jti}")
}

pub(crate) fn encode_record<T: Serialize>(record: &T) -> Result<String, AuthError> {
    serde_json::to_string(record).map_err(|e| StorageError::from(e).into())
}

pub(crate) fn decode_record<T: DeserializeOwned>(raw: &str) -> Result<T, AuthError> {
    serde_json::from_str(raw).map_err(|e| StorageError::from(e).into())
}

/// Time left until `at`, zero if already past.
pub(crate) fn remaining(at: OffsetDateTime, now: OffsetDateTime) -> Duration {
    if at > now {
        (at - now).unsigned_abs()
    } else {
        Duration::ZERO
    }
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub authorization_code_ttl: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &TokenConfig) -> Self {
        Self {
            access_token_ttl: Duration::from_secs(config.access_token_ttl),
            refresh_token_ttl: Duration::from_secs(config.refresh_token_ttl),
            authorization_code_ttl: Duration::from_secs(config.authorization_code_ttl),
        }
    }

    /// How long family bookkeeping must outlive its newest member.
    pub fn family_ttl(&self) -> Duration {
        self.refresh_token_ttl.max(self.access_token_ttl) + EXPIRY_GRACE
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&TokenConfig::default())
    }
}

/// Client authentication material presented at the token endpoint.
#[derive(Clone, Copy)]
pub struct ClientCredentials<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
}

impl<'a> ClientCredentials<'a> {
    pub fn public(client_id: &'a str) -> Self {
        Self {
            client_id,
            client_secret: None,
        }
    }

    pub fn confidential(client_id: &'a str, client_secret: &'a str) -> Self {
        Self {
            client_id,
            client_secret: Some(client_secret),
        }
    }
}

impl fmt::Debug for ClientCredentials<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.map(|_| "<redacted>"))
            .finish()
    }
}

/// Everything needed to mint one token response.
struct Issuance<'a> {
    client: &'a Client,
    user: &'a User,
    family_id: &'a str,
    access_scopes: Scopes,
    refresh_scopes: Scopes,
    parent: Option<String>,
    with_refresh: bool,
    id_token_nonce: Option<Option<String>>,
}

pub struct AuthorizationEngine {
    pub(crate) clients: Arc<dyn ClientRegistry>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) cache: Arc<dyn SessionCache>,
    pub(crate) codec: TokenCodec,
    pub(crate) settings: EngineSettings,
    limiter: Arc<dyn RateLimiter>,
}

impl AuthorizationEngine {
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        credentials: Arc<dyn CredentialStore>,
        cache: Arc<dyn SessionCache>,
        codec: TokenCodec,
        settings: EngineSettings,
    ) -> Self {
        Self {
            clients,
            credentials,
            cache,
            codec,
            settings,
            limiter: Arc::new(NoopRateLimiter),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn cache(&self) -> &Arc<dyn SessionCache> {
        &self.cache
    }

    fn check_rate(&self, key: &str, action: RateLimitAction) -> Result<(), AuthError> {
        match self.limiter.check(key, action) {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited => {
                tracing::warn!(key, ?action, "rate limit exceeded");
                Err(AuthError::RateLimited)
            }
        }
    }

    async fn find_enabled_client(&self, client_id: &str) -> Result<Client, AuthError> {
        match self.clients.find_client(client_id).await? {
            Some(client) if client.enabled => Ok(client),
            _ => Err(AuthError::InvalidClient),
        }
    }

    /// Resolve and authenticate the calling client.
    ///
    /// Public clients authenticate by id alone and must not present a
    /// secret; confidential clients must present their secret.
    #[tracing::instrument(skip(self))]
    pub async fn authenticate_client(
        &self,
        credentials: ClientCredentials<'_>,
    ) -> Result<Client, AuthError> {
        let client = self.find_enabled_client(credentials.client_id).await?;
        match (&client.secret_hash, credentials.client_secret) {
            (None, None) => Ok(client),
            (Some(stored), Some(presented)) if verify_client_secret(presented, stored) => {
                Ok(client)
            }
            _ => {
                tracing::warn!(client_id = %client.client_id, "client authentication failed");
                Err(AuthError::InvalidClient)
            }
        }
    }

    /// Authenticate an end user by identifier and password.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate_user(&self, identifier: &str, password: &str) -> Result<User, AuthError> {
        self.check_rate(identifier, RateLimitAction::Login)?;
        if !self
            .credentials
            .verify_user_credential(identifier, password)
            .await?
        {
            return Err(AuthError::UnauthenticatedUser);
        }
        self.credentials
            .find_user_by_identifier(identifier)
            .await?
            .filter(User::is_active)
            .ok_or(AuthError::UnauthenticatedUser)
    }

    async fn find_active_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .credentials
            .find_user(user_id)
            .await?
            .filter(User::is_active))
    }

    fn resolve_scopes(allowed: &Scopes, requested: Option<&str>) -> Result<Scopes, AuthError> {
        match requested.map(Scopes::parse) {
            Some(requested) if !requested.is_empty() => {
                if requested.is_subset(allowed) {
                    Ok(requested)
                } else {
                    Err(AuthError::InvalidScope)
                }
            }
            _ => Ok(allowed.clone()),
        }
    }

    fn resolve_pkce(
        client: &Client,
        request: &AuthorizationRequest,
    ) -> Result<Option<PkceChallenge>, AuthError> {
        let Some(challenge) = request.code_challenge.as_deref() else {
            if client.pkce_required() {
                return Err(AuthError::InvalidRequest("code_challenge is required"));
            }
            return Ok(None);
        };
        let method = match request.code_challenge_method.as_deref() {
            None => PkceMethod::Plain,
            Some(m) => m
                .parse()
                .map_err(|_| AuthError::InvalidRequest("unsupported code_challenge_method"))?,
        };
        if !pkce::is_valid_verifier(challenge) {
            return Err(AuthError::InvalidRequest("malformed code_challenge"));
        }
        Ok(Some(PkceChallenge {
            challenge: challenge.to_string(),
            method,
        }))
    }

    /// `StartAuthorization`: validate the request and issue a single-use code.
    ///
    /// Checks run in an order that keeps errors safe to report: client and
    /// redirect URI first (never redirected to), then everything else.
    #[tracing::instrument(skip(self, request, user), fields(client_id = %request.client_id))]
    pub async fn start_authorization(
        &self,
        request: &AuthorizationRequest,
        user: Option<&AuthenticatedUser>,
    ) -> Result<AuthorizationGrant, AuthError> {
        let client = self.find_enabled_client(&request.client_id).await?;

        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) if client.is_redirect_uri_allowed(uri) => uri.to_string(),
            Some(_) => return Err(AuthError::InvalidRedirect),
            None => match client.redirect_uris.as_slice() {
                [only] => only.clone(),
                _ => return Err(AuthError::InvalidRedirect),
            },
        };

        if request.response_type != "code" {
            return Err(AuthError::UnsupportedResponseType);
        }
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(AuthError::UnauthorizedClient);
        }
        let scopes = Self::resolve_scopes(&client.scopes, request.scope.as_deref())?;
        let pkce = Self::resolve_pkce(&client, request)?;

        let user = user.ok_or(AuthError::UnauthenticatedUser)?;
        if let Some(consented) = &user.consented_scopes
            && !scopes.is_subset(consented)
        {
            return Err(AuthError::InvalidScope);
        }
        if self.find_active_user(&user.user_id).await?.is_none() {
            return Err(AuthError::UnauthenticatedUser);
        }

        let code = generate_opaque_token()?;
        let now = OffsetDateTime::now_utc();
        let expires_at = now + self.settings.authorization_code_ttl;
        let record = AuthorizationCodeRecord {
            user_id: user.user_id.clone(),
            client_id: client.client_id.clone(),
            scopes: scopes.clone(),
            redirect_uri: redirect_uri.clone(),
            pkce,
            nonce: request.nonce.clone(),
            family_id: uuid::Uuid::new_v4().to_string(),
            issued_at: now,
            expires_at,
        };
        // Single write: either the code exists with its full record or not at all.
        self.cache
            .put(
                &code_key(&code),
                &encode_record(&record)?,
                self.settings.authorization_code_ttl + EXPIRY_GRACE,
            )
            .await?;

        tracing::info!(user_id = %user.user_id, scope = %scopes, "authorization code issued");
        Ok(AuthorizationGrant {
            code,
            redirect_uri,
            state: request.state.clone(),
            scopes,
            expires_at,
        })
    }

    /// `ExchangeCode`: trade an authorization code for tokens.
    #[tracing::instrument(skip(self, code, code_verifier))]
    pub async fn exchange_code(
        &self,
        code: &str,
        credentials: ClientCredentials<'_>,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<IssuedTokens, AuthError> {
        self.check_rate(credentials.client_id, RateLimitAction::Token)?;
        let client = self.authenticate_client(credentials).await?;
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(AuthError::UnauthorizedClient);
        }

        let key = code_key(code);
        let Some(raw) = self.cache.get(&key).await? else {
            return Err(self.reject_consumed_code(code).await);
        };
        let record: AuthorizationCodeRecord = decode_record(&raw)?;

        // Mismatches below leave the code in place for its legitimate holder.
        if record.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, "code presented by a different client");
            return Err(AuthError::InvalidGrant("authorization code was not issued to this client"));
        }
        let now = OffsetDateTime::now_utc();
        if now >= record.expires_at {
            self.cache.compare_and_delete(&key, &raw).await?;
            return Err(AuthError::InvalidGrant("authorization code expired"));
        }
        if record.redirect_uri != redirect_uri {
            return Err(AuthError::InvalidGrant("redirect_uri does not match the authorization request"));
        }
        match (&record.pkce, code_verifier) {
            (Some(challenge), Some(verifier)) if pkce::verify(challenge, verifier) => {}
            (None, None) => {}
            (Some(_), _) => return Err(AuthError::InvalidGrant("PKCE verification failed")),
            (None, Some(_)) => {
                return Err(AuthError::InvalidGrant("code_verifier sent without a code_challenge"));
            }
        }

        // The marker must exist before the code disappears, otherwise a replay
        // landing in between sees neither and escapes family revocation.
        self.cache
            .put(
                &consumed_key(code),
                &record.family_id,
                self.settings.family_ttl(),
            )
            .await?;
        if !self.cache.compare_and_delete(&key, &raw).await? {
            tracing::warn!(family_id = %record.family_id, "concurrent redemption of authorization code");
            self.revoke_family(&record.family_id).await?;
            return Err(AuthError::InvalidGrant("authorization code already used"));
        }

        let user = self
            .find_active_user(&record.user_id)
            .await?
            .ok_or(AuthError::InvalidGrant("user is no longer active"))?;

        let tokens = self
            .issue(Issuance {
                client: &client,
                user: &user,
                family_id: &record.family_id,
                access_scopes: record.scopes.clone(),
                refresh_scopes: record.scopes,
                parent: None,
                with_refresh: client.allows_grant(GrantType::RefreshToken),
                id_token_nonce: Some(record.nonce),
            })
            .await?;
        tracing::info!(user_id = %user.id, client_id = %client.client_id, "authorization code exchanged");
        Ok(tokens)
    }

    async fn reject_consumed_code(&self, code: &str) -> AuthError {
        match self.cache.get(&consumed_key(code)).await {
            Ok(Some(family_id)) => {
                tracing::warn!(%family_id, "authorization code replay, revoking token family");
                if let Err(e) = self.revoke_family(&family_id).await {
                    return e;
                }
                AuthError::InvalidGrant("authorization code already used")
            }
            Ok(None) => AuthError::InvalidGrant("unknown authorization code"),
            Err(e) => e.into(),
        }
    }

    /// `RefreshToken`: rotate a refresh token.
    ///
    /// `scope` may narrow (never widen) the access token's scope; the new
    /// refresh token keeps the original grant.
    #[tracing::instrument(skip(self, refresh_token))]
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        credentials: ClientCredentials<'_>,
        scope: Option<&str>,
    ) -> Result<IssuedTokens, AuthError> {
        self.check_rate(credentials.client_id, RateLimitAction::Token)?;
        let client = self.authenticate_client(credentials).await?;
        if !client.allows_grant(GrantType::RefreshToken) {
            return Err(AuthError::UnauthorizedClient);
        }

        let digest = token_digest(refresh_token);
        let key = refresh_key(&digest);
        let Some(raw) = self.cache.get(&key).await? else {
            return Err(AuthError::InvalidGrant("unknown refresh token"));
        };
        let record: RefreshRecord = decode_record(&raw)?;

        if record.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, "refresh token presented by a different client");
            return Err(AuthError::InvalidGrant("refresh token was not issued to this client"));
        }
        if self.cache.is_family_revoked(&record.family_id).await? {
            return Err(AuthError::InvalidGrant("refresh token has been revoked"));
        }
        if record.state == RefreshState::Rotated {
            tracing::warn!(family_id = %record.family_id, "rotated refresh token reused, revoking token family");
            self.revoke_family(&record.family_id).await?;
            return Err(AuthError::InvalidGrant("refresh token has been revoked"));
        }
        let now = OffsetDateTime::now_utc();
        if now >= record.expires_at {
            self.cache.compare_and_delete(&key, &raw).await?;
            return Err(AuthError::InvalidGrant("refresh token expired"));
        }
        let access_scopes = Self::resolve_scopes(&record.scopes, scope)?;

        let Some(user) = self.find_active_user(&record.user_id).await? else {
            return Err(AuthError::InvalidGrant("user is no longer active"));
        };

        let rotated = RefreshRecord {
            state: RefreshState::Rotated,
            ..record.clone()
        };
        let keep_for = remaining(record.expires_at, now) + EXPIRY_GRACE;
        if !self
            .cache
            .compare_and_swap(&key, &raw, &encode_record(&rotated)?, keep_for)
            .await?
        {
            tracing::warn!(family_id = %record.family_id, "concurrent refresh token use, revoking token family");
            self.revoke_family(&record.family_id).await?;
            return Err(AuthError::InvalidGrant("refresh token has been revoked"));
        }

        self.issue(Issuance {
            client: &client,
            user: &user,
            family_id: &record.family_id,
            access_scopes,
            refresh_scopes: record.scopes,
            parent: Some(digest),
            with_refresh: true,
            id_token_nonce: None,
        })
        .await
    }

    /// `ClientCredentialsGrant`: machine-to-machine access token, no refresh.
    #[tracing::instrument(skip(self))]
    pub async fn client_credentials_grant(
        &self,
        credentials: ClientCredentials<'_>,
        scope: Option<&str>,
    ) -> Result<IssuedTokens, AuthError> {
        self.check_rate(credentials.client_id, RateLimitAction::Token)?;
        let client = self.authenticate_client(credentials).await?;
        if client.is_public() || !client.allows_grant(GrantType::ClientCredentials) {
            return Err(AuthError::UnauthorizedClient);
        }
        let scopes = Self::resolve_scopes(&client.scopes, scope)?;

        let now = OffsetDateTime::now_utc();
        let ttl = client
            .access_token_ttl
            .unwrap_or(self.settings.access_token_ttl);
        let claims = AccessClaims {
            iss: self.codec.issuer().to_string(),
            sub: client.client_id.clone(),
            client_id: client.client_id.clone(),
            scope: scopes.clone(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            fid: None,
        };
        let access_token = self.codec.mint_access_token(&claims)?;
        tracing::info!(client_id = %client.client_id, scope = %scopes, "client credentials token issued");
        Ok(IssuedTokens {
            access_token,
            expires_in: ttl.as_secs(),
            refresh_token: None,
            id_token: None,
            scopes,
        })
    }

    /// `Revoke(family)`: invalidate every token of a family.
    pub async fn revoke_family(&self, family_id: &str) -> Result<usize, AuthError> {
        let removed = self
            .cache
            .revoke_family(family_id, self.settings.family_ttl())
            .await?;
        tracing::warn!(%family_id, removed, "token family revoked");
        Ok(removed)
    }

    async fn issue(&self, issuance: Issuance<'_>) -> Result<IssuedTokens, AuthError> {
        let Issuance {
            client,
            user,
            family_id,
            access_scopes,
            refresh_scopes,
            parent,
            with_refresh,
            id_token_nonce,
        } = issuance;
        let now = OffsetDateTime::now_utc();

        let refresh_token = if with_refresh {
            let token = generate_opaque_token()?;
            let key = refresh_key(&token_digest(&token));
            let record = RefreshRecord {
                family_id: family_id.to_string(),
                user_id: user.id.clone(),
                client_id: client.client_id.clone(),
                scopes: refresh_scopes,
                parent,
                state: RefreshState::Active,
                issued_at: now,
                expires_at: now + self.settings.refresh_token_ttl,
            };
            self.cache
                .put(
                    &key,
                    &encode_record(&record)?,
                    self.settings.refresh_token_ttl + EXPIRY_GRACE,
                )
                .await?;
            if !self
                .cache
                .link_family(family_id, &key, self.settings.family_ttl())
                .await?
            {
                self.cache.delete(&key).await?;
                return Err(AuthError::InvalidGrant("token family has been revoked"));
            }
            Some(token)
        } else {
            None
        };

        let ttl = client
            .access_token_ttl
            .unwrap_or(self.settings.access_token_ttl);
        let exp = (now + ttl).unix_timestamp();
        let claims = AccessClaims {
            iss: self.codec.issuer().to_string(),
            sub: user.id.clone(),
            client_id: client.client_id.clone(),
            scope: access_scopes.clone(),
            iat: now.unix_timestamp(),
            exp,
            jti: uuid::Uuid::new_v4().to_string(),
            fid: Some(family_id.to_string()),
        };
        let access_token = self.codec.mint_access_token(&claims)?;

        let id_token = match id_token_nonce {
            Some(nonce) if access_scopes.contains("openid") => {
                let email = access_scopes
                    .contains("email")
                    .then(|| user.identifier.clone());
                let name = if access_scopes.contains("profile") {
                    user.name.clone()
                } else {
                    None
                };
                Some(self.codec.mint_id_token(&IdClaims {
                    iss: self.codec.issuer().to_string(),
                    sub: user.id.clone(),
                    aud: client.client_id.clone(),
                    iat: now.unix_timestamp(),
                    exp,
                    nonce,
                    email,
                    name,
                })?)
            }
            _ => None,
        };

        Ok(IssuedTokens {
            access_token,
            expires_in: ttl.as_secs(),
            refresh_token,
            id_token,
            scopes: access_scopes,
        })
    }
}
