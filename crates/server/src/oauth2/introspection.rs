//! Revocation (RFC 7009) and introspection (RFC 7662).
//!
//! An access token is live only if its signature and expiry verify, its
//! family has not been revoked, and its `jti` is not deny-listed. A refresh
//! token is live only while its record is `Active`, unexpired, and in an
//! unrevoked family.

use crate::error::AuthError;
use crate::oauth2::engine::{
    AuthorizationEngine, ClientCredentials, EXPIRY_GRACE, decode_record, refresh_key, remaining,
    revoked_jti_key,
};
use crate::oauth2::types::{Client, RefreshRecord, RefreshState, User};
use crate::token::{AccessClaims, token_digest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    /// Unrecognized hints are ignored, as RFC 7009 requires.
    pub fn parse(hint: Option<&str>) -> Option<Self> {
        match hint {
            Some("access_token") => Some(TokenTypeHint::AccessToken),
            Some("refresh_token") => Some(TokenTypeHint::RefreshToken),
            Some(other) => {
                tracing::debug!(hint = other, "ignoring unknown token_type_hint");
                None
            }
            None => None,
        }
    }
}

/// RFC 7662 introspection response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Introspection {
    pub fn inactive() -> Self {
        Self::default()
    }

    fn from_access(claims: AccessClaims) -> Self {
        Self {
            active: true,
            scope: Some(claims.scope.to_string()),
            client_id: Some(claims.client_id),
            sub: Some(claims.sub),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            token_type: Some("Bearer".into()),
            jti: Some(claims.jti),
        }
    }

    fn from_refresh(record: RefreshRecord) -> Self {
        Self {
            active: true,
            scope: Some(record.scopes.to_string()),
            client_id: Some(record.client_id),
            sub: Some(record.user_id),
            exp: Some(record.expires_at.unix_timestamp()),
            iat: Some(record.issued_at.unix_timestamp()),
            token_type: Some("refresh_token".into()),
            jti: None,
        }
    }
}

impl AuthorizationEngine {
    /// Verify an access token for resource use.
    pub async fn validate_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims = self.codec.verify_access_token(token).map_err(|e| {
            tracing::debug!(error = %e, "access token rejected");
            AuthError::InvalidToken
        })?;
        if let Some(family_id) = &claims.fid
            && self.cache.is_family_revoked(family_id).await?
        {
            return Err(AuthError::InvalidToken);
        }
        if self.cache.get(&revoked_jti_key(&claims.jti)).await?.is_some() {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    /// Resolve the user behind a token carrying the `openid` scope.
    pub async fn userinfo(&self, token: &str) -> Result<(AccessClaims, User), AuthError> {
        let claims = self.validate_access_token(token).await?;
        if !claims.scope.contains("openid") {
            return Err(AuthError::InsufficientScope);
        }
        // Client-credentials tokens have no family and no user behind them.
        if claims.fid.is_none() {
            return Err(AuthError::InvalidToken);
        }
        let user = self
            .credentials
            .find_user(&claims.sub)
            .await?
            .filter(User::is_active)
            .ok_or(AuthError::InvalidToken)?;
        Ok((claims, user))
    }

    async fn live_refresh_record(&self, token: &str) -> Result<Option<RefreshRecord>, AuthError> {
        let Some(raw) = self.cache.get(&refresh_key(&token_digest(token))).await? else {
            return Ok(None);
        };
        Ok(Some(decode_record(&raw)?))
    }

    /// Revoke a token on behalf of `credentials`' client.
    ///
    /// Unknown tokens and tokens owned by another client are left alone and
    /// still report success, so the endpoint reveals nothing about them.
    #[tracing::instrument(skip(self, token))]
    pub async fn revoke(
        &self,
        credentials: ClientCredentials<'_>,
        token: &str,
        hint: Option<TokenTypeHint>,
    ) -> Result<(), AuthError> {
        let client = self.authenticate_client(credentials).await?;
        let handled = match hint {
            Some(TokenTypeHint::RefreshToken) => {
                self.revoke_refresh(&client, token).await? || self.revoke_access(&client, token).await?
            }
            _ => self.revoke_access(&client, token).await? || self.revoke_refresh(&client, token).await?,
        };
        if !handled {
            tracing::debug!(client_id = %client.client_id, "revocation of unknown token ignored");
        }
        Ok(())
    }

    async fn revoke_refresh(&self, client: &Client, token: &str) -> Result<bool, AuthError> {
        let Some(record) = self.live_refresh_record(token).await? else {
            return Ok(false);
        };
        if record.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, "refusing to revoke another client's refresh token");
            return Ok(true);
        }
        self.revoke_family(&record.family_id).await?;
        Ok(true)
    }

    async fn revoke_access(&self, client: &Client, token: &str) -> Result<bool, AuthError> {
        let Ok(claims) = self.codec.verify_access_token(token) else {
            return Ok(false);
        };
        if claims.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, "refusing to revoke another client's access token");
            return Ok(true);
        }
        let exp = OffsetDateTime::from_unix_timestamp(claims.exp)
            .map_err(|_| AuthError::InvalidToken)?;
        let ttl: Duration = remaining(exp, OffsetDateTime::now_utc()) + EXPIRY_GRACE;
        self.cache
            .put(&revoked_jti_key(&claims.jti), &claims.client_id, ttl)
            .await?;
        tracing::info!(jti = %claims.jti, "access token revoked");
        Ok(true)
    }

    /// Introspect a token on behalf of an authenticated client.
    #[tracing::instrument(skip(self, token))]
    pub async fn introspect(
        &self,
        credentials: ClientCredentials<'_>,
        token: &str,
        hint: Option<TokenTypeHint>,
    ) -> Result<Introspection, AuthError> {
        self.authenticate_client(credentials).await?;
        let found = match hint {
            Some(TokenTypeHint::RefreshToken) => match self.introspect_refresh(token).await? {
                Some(found) => Some(found),
                None => self.introspect_access(token).await?,
            },
            _ => match self.introspect_access(token).await? {
                Some(found) => Some(found),
                None => self.introspect_refresh(token).await?,
            },
        };
        Ok(found.unwrap_or_else(Introspection::inactive))
    }

    async fn introspect_access(&self, token: &str) -> Result<Option<Introspection>, AuthError> {
        match self.validate_access_token(token).await {
            Ok(claims) => Ok(Some(Introspection::from_access(claims))),
            Err(AuthError::InvalidToken) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn introspect_refresh(&self, token: &str) -> Result<Option<Introspection>, AuthError> {
        let Some(record) = self.live_refresh_record(token).await? else {
            return Ok(None);
        };
        if record.state != RefreshState::Active
            || OffsetDateTime::now_utc() >= record.expires_at
            || self.cache.is_family_revoked(&record.family_id).await?
        {
            return Ok(None);
        }
        Ok(Some(Introspection::from_refresh(record)))
    }
}
