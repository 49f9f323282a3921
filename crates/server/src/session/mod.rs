//! Session cache: expiring key-value state with atomic primitives.
//!
//! Holds authorization codes, refresh-token records, login sessions and
//! token-family bookkeeping. Expiry here is advisory; the engine re-checks
//! record timestamps itself.
//!
//! Key layout used by the engine:
//! - `code:<code>` → authorization code record
//! - `consumed:<code>` → family id of an already exchanged code
//! - `refresh:<sha256>` → refresh record
//! - `revoked_jti:<jti>` → deny-listed access token
//! - `login:<sid>` → authenticated user id

pub mod login;
pub mod memory;
pub mod redis;

use crate::error::StorageError;
use async_trait::async_trait;
use std::time::Duration;

pub use login::{LoginSessions, SESSION_COOKIE};
pub use memory::MemorySessionCache;
pub use redis::RedisSessionCache;

#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Delete `key` only if it currently holds `expected`. Returns whether the
    /// delete happened; exactly one of any number of concurrent callers wins.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StorageError>;

    /// Replace `expected` with `new` atomically.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Register `key` as a member of a token family. Returns `false` without
    /// linking if the family has already been revoked.
    async fn link_family(
        &self,
        family_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    /// Mark a family revoked for `ttl` and delete every member key. Returns the
    /// number of members removed.
    async fn revoke_family(&self, family_id: &str, ttl: Duration) -> Result<usize, StorageError>;

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, StorageError>;

    async fn health_check(&self) -> Result<(), StorageError>;
}
