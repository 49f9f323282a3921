//! Minting and verification of signed tokens.
//!
//! Access tokens and ID tokens are HS256 JWTs carrying the signing key id in
//! the header. Verification never reads a claim before the signature has been
//! checked. Refresh tokens and authorization codes are opaque random values
//! that only the session cache can resolve.

use crate::oauth2::types::Scopes;
use crate::token::keys::KeyManager;
use base64::Engine;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

const ACCESS_TOKEN_TYP: &str = "at+jwt";
const ID_TOKEN_TYP: &str = "JWT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token was signed with an unknown key")]
    UnknownKey,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token could not be signed: {0}")]
    Signing(String),
    #[error("random source failed: {0}")]
    Random(String),
}

/// Claims of a self-contained access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    /// User id, or the client id for client-credentials tokens.
    pub sub: String,
    pub client_id: String,
    pub scope: Scopes,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    /// Token family. Absent for client-credentials tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fid: Option<String>,
}

/// OpenID Connect ID token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TokenCodec {
    keys: Arc<KeyManager>,
    issuer: String,
}

impl TokenCodec {
    pub fn new(keys: Arc<KeyManager>, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn mint_access_token(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        self.sign(ACCESS_TOKEN_TYP, claims)
    }

    pub fn mint_id_token(&self, claims: &IdClaims) -> Result<String, TokenError> {
        self.sign(ID_TOKEN_TYP, claims)
    }

    fn sign<T: Serialize>(&self, typ: &str, claims: &T) -> Result<String, TokenError> {
        let (kid, key) = self
            .keys
            .signing_key()
            .ok_or_else(|| TokenError::Signing("no active key".into()))?;
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        header.typ = Some(typ.to_string());
        encode(&header, claims, key).map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify signature, issuer and expiry of an access token.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != Algorithm::HS256 || header.typ.as_deref() != Some(ACCESS_TOKEN_TYP) {
            return Err(TokenError::Malformed);
        }
        let kid = header.kid.ok_or(TokenError::UnknownKey)?;
        let key = self
            .keys
            .verification_key(&kid)
            .ok_or(TokenError::UnknownKey)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<AccessClaims>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        })?;

        // The library tolerates exp == now; expiry is exclusive here.
        if data.claims.exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }
}

/// 32 random bytes, base64url without padding.
pub fn generate_opaque_token() -> Result<String, TokenError> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).map_err(|e| TokenError::Random(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Storage key material for an opaque token: hex SHA-256.
pub fn token_digest(token: &str) -> String {
    let hash = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SECRET_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const ISSUER: &str = "https://idp.example";

    fn codec(active: &str) -> TokenCodec {
        let keys = KeyManager::new(active, [("v1", SECRET_A), ("v2", SECRET_B)]).unwrap();
        TokenCodec::new(Arc::new(keys), ISSUER)
    }

    fn claims(ttl: i64) -> AccessClaims {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        AccessClaims {
            iss: ISSUER.into(),
            sub: "u1".into(),
            client_id: "c1".into(),
            scope: Scopes::parse("read write"),
            iat: now,
            exp: now + ttl,
            jti: "j1".into(),
            fid: Some("f1".into()),
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let codec = codec("v1");
        let original = claims(300);
        let token = codec.mint_access_token(&original).unwrap();
        let verified = codec.verify_access_token(&token).unwrap();
        assert_eq!(verified, original);
    }

    #[test]
    fn expired_token_rejected() {
        let codec = codec("v1");
        let token = codec.mint_access_token(&claims(-10)).unwrap();
        assert_eq!(codec.verify_access_token(&token), Err(TokenError::Expired));
        let token = codec.mint_access_token(&claims(0)).unwrap();
        assert_eq!(codec.verify_access_token(&token), Err(TokenError::Expired));
    }

    #[test]
    fn tampered_payload_rejected() {
        let codec = codec("v1");
        let token = codec.mint_access_token(&claims(300)).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims(300);
        forged.scope = Scopes::parse("admin");
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&forged).unwrap());
        parts[1] = &payload;
        let forged_token = parts.join(".");
        assert_eq!(
            codec.verify_access_token(&forged_token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn retired_key_still_verifies() {
        let old = codec("v1");
        let token = old.mint_access_token(&claims(300)).unwrap();
        let rotated = codec("v2");
        assert!(rotated.verify_access_token(&token).is_ok());
    }

    #[test]
    fn unknown_kid_rejected() {
        let keys = KeyManager::new("v9", [("v9", SECRET_A)]).unwrap();
        let foreign = TokenCodec::new(Arc::new(keys), ISSUER);
        let token = foreign.mint_access_token(&claims(300)).unwrap();
        assert_eq!(
            codec("v1").verify_access_token(&token),
            Err(TokenError::UnknownKey)
        );
    }

    #[test]
    fn wrong_issuer_rejected() {
        let codec = codec("v1");
        let mut c = claims(300);
        c.iss = "https://evil.example".into();
        let token = codec.mint_access_token(&c).unwrap();
        assert_eq!(codec.verify_access_token(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn id_token_is_not_an_access_token() {
        let codec = codec("v1");
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let id = codec
            .mint_id_token(&IdClaims {
                iss: ISSUER.into(),
                sub: "u1".into(),
                aud: "c1".into(),
                iat: now,
                exp: now + 300,
                nonce: None,
                email: None,
                name: None,
            })
            .unwrap();
        assert_eq!(codec.verify_access_token(&id), Err(TokenError::Malformed));
    }

    #[test]
    fn opaque_tokens_are_unique_and_url_safe() {
        let a = generate_opaque_token().unwrap();
        let b = generate_opaque_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            token_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
