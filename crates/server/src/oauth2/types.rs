//! Domain types shared by the engine, the adapters and the HTTP layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// A normalized set of OAuth2 scopes.
///
/// Ordering is lexical so the space-separated rendering is stable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Scopes(BTreeSet<String>);

impl Scopes {
    pub fn parse(raw: &str) -> Self {
        Scopes(raw.split_whitespace().map(str::to_string).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_subset(&self, other: &Scopes) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Scopes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Scopes(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}

impl From<Scopes> for String {
    fn from(s: Scopes) -> Self {
        s.to_string()
    }
}

impl From<String> for Scopes {
    fn from(s: String) -> Self {
        Scopes::parse(&s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::ClientCredentials => "client_credentials",
        }
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            other => Err(format!("unknown grant type '{other}'")),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered relying party.
#[derive(Clone, Debug)]
pub struct Client {
    pub client_id: String,
    pub name: String,
    /// `None` for public clients.
    pub secret_hash: Option<String>,
    /// Exact-match allow-list.
    pub redirect_uris: Vec<String>,
    pub grant_types: BTreeSet<GrantType>,
    pub scopes: Scopes,
    pub require_pkce: bool,
    pub enabled: bool,
    pub access_token_ttl: Option<Duration>,
}

impl Client {
    pub fn is_public(&self) -> bool {
        self.secret_hash.is_none()
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    /// Byte-for-byte comparison; no normalization of any kind.
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Public clients cannot keep a secret, so they always need PKCE.
    pub fn pkce_required(&self) -> bool {
        self.require_pkce || self.is_public()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Locked,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Locked => "locked",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "locked" => Ok(UserStatus::Locked),
            "disabled" => Ok(UserStatus::Disabled),
            other => Err(format!("unknown user status '{other}'")),
        }
    }
}

/// An end user. Credential material never leaves the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
    /// Login identifier (the email address).
    pub identifier: String,
    pub name: Option<String>,
    pub status: UserStatus,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// The user context an authorization request runs under.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: String,
    /// Scopes the user consented to. `None` means consent is implicit.
    pub consented_scopes: Option<Scopes>,
}

impl AuthenticatedUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            consented_scopes: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl FromStr for PkceMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(PkceMethod::S256),
            "plain" => Ok(PkceMethod::Plain),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: PkceMethod,
}

/// Input to `StartAuthorization`.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: Option<String>,
    /// Space-separated; `None` requests the client's full scope set.
    pub scope: Option<String>,
    pub response_type: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Result of a successful `StartAuthorization`.
#[derive(Clone, Debug)]
pub struct AuthorizationGrant {
    pub code: String,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub scopes: Scopes,
    pub expires_at: OffsetDateTime,
}

/// Session-cache record behind an authorization code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCodeRecord {
    pub user_id: String,
    pub client_id: String,
    pub scopes: Scopes,
    pub redirect_uri: String,
    pub pkce: Option<PkceChallenge>,
    pub nonce: Option<String>,
    /// Token family every token minted from this code joins.
    pub family_id: String,
    #[serde(with = "time::serde::timestamp")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    Active,
    Rotated,
}

/// Session-cache record behind a refresh token. Keyed by the token's digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRecord {
    pub family_id: String,
    pub user_id: String,
    pub client_id: String,
    pub scopes: Scopes,
    /// Digest of the refresh token this one was rotated from.
    pub parent: Option<String>,
    pub state: RefreshState,
    #[serde(with = "time::serde::timestamp")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
}

/// What a successful grant hands back to the client.
#[derive(Clone, Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub scopes: Scopes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_normalize_and_render() {
        let scopes = Scopes::parse("  write read   read ");
        assert_eq!(scopes.to_string(), "read write");
        assert!(scopes.contains("read"));
        assert!(!scopes.contains("admin"));
    }

    #[test]
    fn scopes_subset() {
        let client = Scopes::parse("openid profile read");
        assert!(Scopes::parse("read").is_subset(&client));
        assert!(Scopes::parse("").is_subset(&client));
        assert!(!Scopes::parse("read write").is_subset(&client));
    }

    #[test]
    fn scopes_serialize_as_string() {
        let json = serde_json::to_string(&Scopes::parse("b a")).unwrap();
        assert_eq!(json, "\"a b\"");
        let back: Scopes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Scopes::parse("a b"));
    }

    #[test]
    fn grant_type_parsing() {
        assert_eq!(
            "client_credentials".parse::<GrantType>().unwrap(),
            GrantType::ClientCredentials
        );
        assert!("password".parse::<GrantType>().is_err());
    }

    #[test]
    fn redirect_match_is_exact() {
        let client = Client {
            client_id: "c1".into(),
            name: "c1".into(),
            secret_hash: None,
            redirect_uris: vec!["https://app/cb".into()],
            grant_types: BTreeSet::from([GrantType::AuthorizationCode]),
            scopes: Scopes::parse("read"),
            require_pkce: false,
            enabled: true,
            access_token_ttl: None,
        };
        assert!(client.is_redirect_uri_allowed("https://app/cb"));
        assert!(!client.is_redirect_uri_allowed("https://app/cb/"));
        assert!(!client.is_redirect_uri_allowed("https://APP/cb"));
        assert!(client.pkce_required());
    }
}
