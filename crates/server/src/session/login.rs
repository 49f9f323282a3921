//! Login sessions: the authenticated-user context behind `/authorize`.

use crate::error::AuthError;
use crate::session::SessionCache;
use crate::token::generate_opaque_token;
use std::sync::Arc;
use std::time::Duration;

/// Cookie carrying the login session id.
pub const SESSION_COOKIE: &str = "idp_session";

fn login_key(sid: &str) -> String {
    format!("login:{sid}")
}

#[derive(Clone)]
pub struct LoginSessions {
    cache: Arc<dyn SessionCache>,
    ttl: Duration,
}

impl LoginSessions {
    pub fn new(cache: Arc<dyn SessionCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session for `user_id` and return its id.
    pub async fn create(&self, user_id: &str) -> Result<String, AuthError> {
        let sid = generate_opaque_token()?;
        self.cache.put(&login_key(&sid), user_id, self.ttl).await?;
        Ok(sid)
    }

    pub async fn resolve(&self, sid: &str) -> Result<Option<String>, AuthError> {
        Ok(self.cache.get(&login_key(sid)).await?)
    }

    pub async fn end(&self, sid: &str) -> Result<(), AuthError> {
        self.cache.delete(&login_key(sid)).await?;
        Ok(())
    }
}
