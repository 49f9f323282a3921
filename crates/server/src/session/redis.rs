use crate::error::StorageError;
use crate::session::SessionCache;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use std::time::Duration;

// Scripts touch keys derived from their arguments, so this backend targets a
// single Redis node rather than a cluster.
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const COMPARE_AND_SWAP: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
"#;

const LINK_FAMILY: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('SADD', KEYS[2], ARGV[1])
local ttl = tonumber(ARGV[2])
if redis.call('PTTL', KEYS[2]) < ttl then
    redis.call('PEXPIRE', KEYS[2], ttl)
end
return 1
"#;

const REVOKE_FAMILY: &str = r#"
redis.call('SET', KEYS[1], '1', 'PX', ARGV[1])
local members = redis.call('SMEMBERS', KEYS[2])
local removed = 0
for _, key in ipairs(members) do
    removed = removed + redis.call('DEL', key)
end
redis.call('DEL', KEYS[2])
return removed
"#;

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects 0
    (ttl.as_millis() as u64).max(1)
}

fn tombstone_key(family_id: &str) -> String {
    format!("family:{family_id}:revoked")
}

fn members_key(family_id: &str) -> String {
    format!("family:{family_id}:members")
}

/// Session cache shared between instances through Redis.
#[derive(Clone)]
pub struct RedisSessionCache {
    conn_manager: ConnectionManager,
    compare_and_delete: Script,
    compare_and_swap: Script,
    link_family: Script,
    revoke_family: Script,
}

impl RedisSessionCache {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;

        let mut conn = conn_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        Ok(Self {
            conn_manager,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
            link_family: Script::new(LINK_FAMILY),
            revoke_family: Script::new(REVOKE_FAMILY),
        })
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.conn_manager.clone();
        conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
            .await
            .map_err(|e| {
                tracing::error!(key, error = %e, "Redis error while setting key");
                StorageError::from(e)
            })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn_manager.clone();
        let swapped: i64 = self
            .compare_and_swap
            .key(key)
            .arg(expected)
            .arg(new)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn link_family(
        &self,
        family_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut conn = self.conn_manager.clone();
        let linked: i64 = self
            .link_family
            .key(tombstone_key(family_id))
            .key(members_key(family_id))
            .arg(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(linked == 1)
    }

    async fn revoke_family(&self, family_id: &str, ttl: Duration) -> Result<usize, StorageError> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = self
            .revoke_family
            .key(tombstone_key(family_id))
            .key(members_key(family_id))
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(removed.max(0) as usize)
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.exists::<_, bool>(tombstone_key(family_id)).await?)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let mut conn = self.conn_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
