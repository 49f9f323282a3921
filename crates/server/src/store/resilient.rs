//! Timeout and retry policy at the adapter boundary.
//!
//! Every call is bounded by a timeout. Idempotent calls that fail with a
//! retryable error are retried once after a backoff; a second failure becomes
//! [`StorageError::Unavailable`]. Conditional writes and credential checks are
//! not idempotent (a timed-out attempt may have been applied), so they are
//! never retried and a retryable failure maps straight to `Unavailable`.

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::oauth2::types::{Client, User};
use crate::session::SessionCache;
use crate::store::{ClientRegistry, CredentialStore};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Retry {
    Once,
    Never,
}

#[derive(Clone, Debug)]
pub struct Resilient<T> {
    inner: T,
    timeout: Duration,
    backoff: Duration,
}

impl<T> Resilient<T> {
    pub fn new(inner: T, timeout: Duration, backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            backoff,
        }
    }

    pub fn from_config(inner: T, config: &StorageConfig) -> Self {
        Self::new(inner, config.timeout(), config.retry_backoff())
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn attempt<R, Fut>(&self, fut: Fut) -> Result<R, StorageError>
    where
        Fut: Future<Output = Result<R, StorageError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.timeout)),
        }
    }

    async fn call<R, F, Fut>(&self, op: &'static str, retry: Retry, f: F) -> Result<R, StorageError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, StorageError>> + Send,
        R: Send,
    {
        let err = match self.attempt(f()).await {
            Err(e) if e.is_retryable() => e,
            other => return other,
        };
        if retry == Retry::Never {
            tracing::error!(op, error = %err, "storage call failed");
            return Err(StorageError::Unavailable(op));
        }

        tracing::warn!(op, error = %err, backoff = ?self.backoff, "storage call failed, retrying");
        tokio::time::sleep(self.backoff).await;
        match self.attempt(f()).await {
            Err(e) if e.is_retryable() => {
                tracing::error!(op, error = %e, "storage call failed after retry");
                Err(StorageError::Unavailable(op))
            }
            other => other,
        }
    }
}

#[async_trait]
impl<T: SessionCache> SessionCache for Resilient<T> {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.call("put", Retry::Once, || self.inner.put(key, value, ttl))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.call("get", Retry::Once, || self.inner.get(key)).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StorageError> {
        self.call("compare_and_delete", Retry::Never, || {
            self.inner.compare_and_delete(key, expected)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        self.call("compare_and_swap", Retry::Never, || {
            self.inner.compare_and_swap(key, expected, new, ttl)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.call("delete", Retry::Once, || self.inner.delete(key))
            .await
    }

    async fn link_family(
        &self,
        family_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        self.call("link_family", Retry::Once, || {
            self.inner.link_family(family_id, key, ttl)
        })
        .await
    }

    async fn revoke_family(&self, family_id: &str, ttl: Duration) -> Result<usize, StorageError> {
        self.call("revoke_family", Retry::Once, || {
            self.inner.revoke_family(family_id, ttl)
        })
        .await
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, StorageError> {
        self.call("is_family_revoked", Retry::Once, || {
            self.inner.is_family_revoked(family_id)
        })
        .await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.attempt(self.inner.health_check()).await
    }
}

#[async_trait]
impl<T: ClientRegistry> ClientRegistry for Resilient<T> {
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        self.call("find_client", Retry::Once, || {
            self.inner.find_client(client_id)
        })
        .await
    }
}

#[async_trait]
impl<T: CredentialStore> CredentialStore for Resilient<T> {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        self.call("find_user", Retry::Once, || self.inner.find_user(user_id))
            .await
    }

    async fn find_user_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, StorageError> {
        self.call("find_user_by_identifier", Retry::Once, || {
            self.inner.find_user_by_identifier(identifier)
        })
        .await
    }

    async fn verify_user_credential(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<bool, StorageError> {
        self.call("verify_user_credential", Retry::Never, || {
            self.inner.verify_user_credential(identifier, secret)
        })
        .await
    }
}
