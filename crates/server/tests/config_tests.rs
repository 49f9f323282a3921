use config::Config;
use rust_identity_provider::config::{AppConfig, CacheBackendKind, ConfigError, load_config};
use std::env;
use std::fs;

const BASE_YAML: &str = r#"
database_url: "postgres://localhost/idp"
issuer_url: "https://idp.example.com"
signing:
  active_kid: "2026-10"
  keys:
    - kid: "2026-10"
      secret: "0123456789abcdef0123456789abcdef"
    - kid: "2026-04"
      secret: "fedcba9876543210fedcba9876543210"
"#;

fn from_yaml(yaml: &str) -> Result<AppConfig, config::ConfigError> {
    Config::builder()
        .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
        .build()?
        .try_deserialize()
}

#[test]
fn test_minimal_config_uses_defaults() {
    let app_config = from_yaml(BASE_YAML).expect("Failed to deserialize app config");
    app_config.validate().expect("valid config");

    assert_eq!(app_config.bind_addr, "0.0.0.0:8080");
    assert_eq!(app_config.login_url, "/oauth2/login");
    assert_eq!(app_config.tokens.access_token_ttl, 300);
    assert_eq!(app_config.tokens.refresh_token_ttl, 86_400);
    assert_eq!(app_config.tokens.authorization_code_ttl, 60);
    assert_eq!(app_config.cache.backend, CacheBackendKind::Memory);
    assert_eq!(app_config.lockout.max_failed_attempts, 5);
    assert_eq!(app_config.rate_limit.requests_per_window, 0);
    assert_eq!(app_config.signing.keys.len(), 2);
    assert!(app_config.clients.is_empty());
}

#[test]
fn test_full_config_deserialization() {
    let yaml = format!(
        r#"{BASE_YAML}
tokens:
  access_token_ttl: 600
  refresh_token_ttl: 3600
cache:
  backend: redis
  redis_url: "redis://127.0.0.1:6379/"
storage:
  timeout_ms: 500
rate_limit:
  requests_per_window: 10
  window_secs: 30
clients:
  - client_id: "c1"
    name: "Example App"
    secret: "{{noop}}c1-secret"
    redirect_uris: ["https://app/cb"]
    grant_types: ["authorization_code", "refresh_token"]
    scopes: ["openid", "read"]
  - client_id: "spa"
    redirect_uris: ["https://spa/cb"]
    grant_types: ["authorization_code"]
    scopes: ["openid"]
    require_pkce: true
    access_token_ttl: 120
"#
    );

    let app_config = from_yaml(&yaml).expect("Failed to deserialize");
    app_config.validate().expect("valid config");

    assert_eq!(app_config.tokens.access_token_ttl, 600);
    assert_eq!(app_config.tokens.authorization_code_ttl, 60);
    assert_eq!(app_config.cache.backend, CacheBackendKind::Redis);
    assert_eq!(app_config.storage.timeout().as_millis(), 500);
    assert_eq!(app_config.storage.retry_backoff().as_millis(), 100);
    assert_eq!(app_config.clients.len(), 2);
    assert_eq!(app_config.clients[0].secret.as_deref(), Some("{noop}c1-secret"));
    assert!(app_config.clients[1].secret.is_none());
    assert!(app_config.clients[1].require_pkce);
    assert_eq!(app_config.clients[1].access_token_ttl, Some(120));
}

#[test]
fn test_config_with_environment_variables() {
    let temp_dir = env::temp_dir();
    let config_path = temp_dir.join("idp_test_config.yaml");
    fs::write(&config_path, BASE_YAML).expect("Failed to write temp config");

    // Environment variables are process-global; the prefix keeps this test isolated.
    unsafe {
        env::set_var("IDPTEST__ISSUER_URL", "https://env.example.com");
        env::set_var("IDPTEST__TOKENS__ACCESS_TOKEN_TTL", "900");
    }

    let config = Config::builder()
        .add_source(config::File::from(config_path.clone()))
        .add_source(config::Environment::with_prefix("IDPTEST").separator("__"))
        .build()
        .expect("Failed to build config");
    let app_config: Result<AppConfig, _> = config.try_deserialize();

    unsafe {
        env::remove_var("IDPTEST__ISSUER_URL");
        env::remove_var("IDPTEST__TOKENS__ACCESS_TOKEN_TTL");
    }
    let _ = fs::remove_file(config_path);

    let app_config = app_config.expect("Failed to deserialize");
    assert_eq!(app_config.issuer_url, "https://env.example.com");
    assert_eq!(app_config.tokens.access_token_ttl, 900);
    // Non-overridden values come from the file
    assert_eq!(app_config.database_url, "postgres://localhost/idp");
}

#[test]
fn test_validation_rejects_bad_signing_setup() {
    let short = BASE_YAML.replace("0123456789abcdef0123456789abcdef", "short");
    let app_config = from_yaml(&short).expect("deserializes");
    assert!(matches!(app_config.validate(), Err(ConfigError::Validation(_))));

    let unknown_kid = BASE_YAML.replace("active_kid: \"2026-10\"", "active_kid: \"missing\"");
    let app_config = from_yaml(&unknown_kid).expect("deserializes");
    assert!(matches!(app_config.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn test_config_partial_structure() {
    let invalid_yaml = r#"
database_url: "postgres://localhost/test"
# Missing issuer_url and signing
"#;

    assert!(
        from_yaml(invalid_yaml).is_err(),
        "Should fail when required fields are missing"
    );
}

#[test]
fn test_load_config_missing_file() {
    let original_dir = env::current_dir().unwrap();
    let temp_dir = env::temp_dir().join("idp_no_config");
    fs::create_dir_all(&temp_dir).unwrap();
    env::set_current_dir(&temp_dir).unwrap();

    let result = load_config();

    env::set_current_dir(original_dir).unwrap();
    assert!(matches!(result, Err(ConfigError::Build(_))));
}
