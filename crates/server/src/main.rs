use rust_identity_provider::api::start_webserver;
use rust_identity_provider::config::{CacheBackendKind, load_config};
use rust_identity_provider::oauth2::{
    AuthorizationEngine, EngineSettings, FixedWindowRateLimiter, OAuth2State,
};
use rust_identity_provider::session::{
    LoginSessions, MemorySessionCache, RedisSessionCache, SessionCache,
};
use rust_identity_provider::store::{DatabaseStore, Resilient};
use rust_identity_provider::token::{KeyManager, TokenCodec};
use sea_orm::Database;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "rust_identity_provider=info,tower_http=info,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    initialize_tracing();

    let config = load_config()?;

    let db = Arc::new(Database::connect(&config.database_url).await?);
    let store = DatabaseStore::new(db, config.lockout.max_failed_attempts);
    for client in &config.clients {
        if store.ensure_client(client).await? {
            tracing::info!(client_id = %client.client_id, "registered client from configuration");
        }
    }
    let store = Arc::new(Resilient::from_config(store, &config.storage));

    let cache: Arc<dyn SessionCache> = match config.cache.backend {
        CacheBackendKind::Memory => {
            tracing::warn!("using in-process session cache; state is lost on restart");
            Arc::new(Resilient::from_config(
                MemorySessionCache::new(),
                &config.storage,
            ))
        }
        CacheBackendKind::Redis => {
            let url = config.cache.redis_url.as_deref().unwrap_or_default();
            let redis = RedisSessionCache::connect(url).await?;
            tracing::info!("connected to redis session cache");
            Arc::new(Resilient::from_config(redis, &config.storage))
        }
    };

    let keys = Arc::new(KeyManager::from_config(&config.signing)?);
    tracing::info!(kid = %keys.active_kid(), "token signing key loaded");
    let codec = TokenCodec::new(keys, config.issuer_url.clone());

    let mut engine = AuthorizationEngine::new(
        store.clone(),
        store,
        cache.clone(),
        codec,
        EngineSettings::from_config(&config.tokens),
    );
    if config.rate_limit.requests_per_window > 0 {
        engine = engine.with_rate_limiter(Arc::new(FixedWindowRateLimiter::new(
            config.rate_limit.requests_per_window,
            Duration::from_secs(config.rate_limit.window_secs),
        )));
    }

    let sessions = LoginSessions::new(
        cache,
        Duration::from_secs(config.tokens.login_session_ttl),
    );
    let state = OAuth2State::new(
        Arc::new(engine),
        sessions,
        config.issuer_url.clone(),
        config.login_url.clone(),
    );

    start_webserver(state, &config.bind_addr).await?;
    Ok(())
}
