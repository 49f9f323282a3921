use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Minimum length of an HMAC signing secret in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Issuer identifier placed in every token (`iss`) and the discovery document.
    pub issuer_url: String,
    /// Where `/authorize` sends unauthenticated users. The original request is
    /// appended as the `continue` parameter.
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default)]
    pub tokens: TokenConfig,
    pub signing: SigningConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Clients seeded into the registry at startup when absent.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

/// Token lifetimes in seconds.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl: u64,
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl: u64,
    #[serde(default = "default_authorization_code_ttl")]
    pub authorization_code_ttl: u64,
    #[serde(default = "default_login_session_ttl")]
    pub login_session_ttl: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: default_access_token_ttl(),
            refresh_token_ttl: default_refresh_token_ttl(),
            authorization_code_ttl: default_authorization_code_ttl(),
            login_session_ttl: default_login_session_ttl(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SigningKeyConfig {
    pub kid: String,
    pub secret: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SigningConfig {
    /// Key id used to sign new tokens. All other keys only verify.
    pub active_kid: String,
    pub keys: Vec<SigningKeyConfig>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
}

/// Bounds applied to every call into the session cache and the stores.
#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_storage_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LockoutConfig {
    /// Consecutive failed logins before an account is locked. 0 disables lockout.
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitConfig {
    /// Token requests allowed per client and window. 0 disables limiting.
    #[serde(default)]
    pub requests_per_window: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 0,
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

/// A client definition from configuration.
///
/// `secret` is either an argon2 PHC string, a `{sha256}` digest, or (for
/// development) a `{noop}` plaintext value which is hashed before storage.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub name: Option<String>,
    pub secret: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub require_pkce: bool,
    /// Per-client access token lifetime override in seconds.
    pub access_token_ttl: Option<u64>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".into()
}

fn default_login_url() -> String {
    "/oauth2/login".into()
}

fn default_access_token_ttl() -> u64 {
    300
}

fn default_refresh_token_ttl() -> u64 {
    86_400
}

fn default_authorization_code_ttl() -> u64 {
    60
}

fn default_login_session_ttl() -> u64 {
    1_800
}

fn default_storage_timeout_ms() -> u64 {
    2_000
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

impl AppConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer_url.is_empty() {
            return Err(ConfigError::Validation("issuer_url must be set".into()));
        }
        if self.signing.keys.is_empty() {
            return Err(ConfigError::Validation(
                "signing.keys must contain at least one key".into(),
            ));
        }
        for key in &self.signing.keys {
            if key.secret.len() < MIN_SECRET_LEN {
                return Err(ConfigError::Validation(format!(
                    "signing key '{}' must be at least {MIN_SECRET_LEN} bytes",
                    key.kid
                )));
            }
        }
        if !self
            .signing
            .keys
            .iter()
            .any(|k| k.kid == self.signing.active_kid)
        {
            return Err(ConfigError::Validation(format!(
                "signing.active_kid '{}' does not name a configured key",
                self.signing.active_kid
            )));
        }
        if self.tokens.access_token_ttl == 0 || self.tokens.refresh_token_ttl == 0 {
            return Err(ConfigError::Validation(
                "token lifetimes must be > 0".into(),
            ));
        }
        if self.cache.backend == CacheBackendKind::Redis && self.cache.redis_url.is_none() {
            return Err(ConfigError::Validation(
                "cache.redis_url is required for the redis backend".into(),
            ));
        }
        if self.rate_limit.requests_per_window > 0 && self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.window_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `TOKENS__ACCESS_TOKEN_TTL`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml"))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            bind_addr: default_bind_addr(),
            issuer_url: "http://localhost:8080".into(),
            login_url: default_login_url(),
            tokens: TokenConfig::default(),
            signing: SigningConfig {
                active_kid: "k1".into(),
                keys: vec![SigningKeyConfig {
                    kid: "k1".into(),
                    secret: "0123456789abcdef0123456789abcdef".into(),
                }],
            },
            cache: CacheConfig::default(),
            storage: StorageConfig::default(),
            lockout: LockoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
            clients: vec![],
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_secret_rejected() {
        let mut cfg = base_config();
        cfg.signing.keys[0].secret = "short".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn unknown_active_kid_rejected() {
        let mut cfg = base_config();
        cfg.signing.active_kid = "k2".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn redis_backend_requires_url() {
        let mut cfg = base_config();
        cfg.cache.backend = CacheBackendKind::Redis;
        assert!(cfg.validate().is_err());
        cfg.cache.redis_url = Some("redis://127.0.0.1/".into());
        assert!(cfg.validate().is_ok());
    }
}
