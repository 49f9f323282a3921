use crate::error::StorageError;
use crate::session::SessionCache;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn extend_to(&mut self, ttl: Duration) {
        let candidate = Instant::now() + ttl;
        if candidate > self.expires_at {
            self.expires_at = candidate;
        }
    }
}

#[derive(Clone, Debug, Default)]
struct FamilyState {
    revoked: bool,
    members: Vec<String>,
}

/// Single-process session cache over `DashMap`.
///
/// Conditional operations run under the shard lock of their key, which makes
/// them atomic with respect to each other.
#[derive(Clone, Default)]
pub struct MemorySessionCache {
    entries: Arc<DashMap<String, CacheEntry<String>>>,
    families: Arc<DashMap<String, CacheEntry<FamilyState>>>,
    last_cleanup: Arc<Mutex<Option<Instant>>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries at most once per interval.
    fn maybe_cleanup(&self) {
        let Ok(mut last_cleanup) = self.last_cleanup.try_lock() else {
            return;
        };
        let due = last_cleanup.is_none_or(|at| at.elapsed() >= CLEANUP_INTERVAL);
        if !due {
            return;
        }
        *last_cleanup = Some(Instant::now());
        drop(last_cleanup);

        self.entries.retain(|_, entry| !entry.is_expired());
        self.families.retain(|_, entry| !entry.is_expired());
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.maybe_cleanup();
        self.entries
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.maybe_cleanup();
        Ok(self.entries.get(key).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.data.clone())
            }
        }))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StorageError> {
        Ok(self
            .entries
            .remove_if(key, |_, entry| !entry.is_expired() && entry.data == expected)
            .is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() && entry.data == expected => {
                *entry = CacheEntry::new(new.to_string(), ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn link_family(
        &self,
        family_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut family = self
            .families
            .entry(family_id.to_string())
            .or_insert_with(|| CacheEntry::new(FamilyState::default(), ttl));
        if family.is_expired() {
            *family = CacheEntry::new(FamilyState::default(), ttl);
        }
        if family.data.revoked {
            return Ok(false);
        }
        family.data.members.push(key.to_string());
        family.extend_to(ttl);
        Ok(true)
    }

    async fn revoke_family(&self, family_id: &str, ttl: Duration) -> Result<usize, StorageError> {
        let members = {
            let mut family = self
                .families
                .entry(family_id.to_string())
                .or_insert_with(|| CacheEntry::new(FamilyState::default(), ttl));
            family.data.revoked = true;
            family.extend_to(ttl);
            std::mem::take(&mut family.data.members)
        };
        let mut removed = 0;
        for key in &members {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .families
            .get(family_id)
            .is_some_and(|f| !f.is_expired() && f.data.revoked))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn put_get_delete() {
        let cache = MemorySessionCache::new();
        cache.put("k", "v", TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = MemorySessionCache::new();
        cache.put("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.compare_and_delete("k", "v").await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_requires_match() {
        let cache = MemorySessionCache::new();
        cache.put("k", "v", TTL).await.unwrap();
        assert!(!cache.compare_and_delete("k", "other").await.unwrap());
        assert!(cache.compare_and_delete("k", "v").await.unwrap());
        assert!(!cache.compare_and_delete("k", "v").await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_delete_has_single_winner() {
        let cache = MemorySessionCache::new();
        cache.put("code:x", "record", TTL).await.unwrap();
        let attempts = (0..32).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.compare_and_delete("code:x", "record").await })
        });
        let wins = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(true))))
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn compare_and_swap_replaces_once() {
        let cache = MemorySessionCache::new();
        cache.put("k", "active", TTL).await.unwrap();
        assert!(cache.compare_and_swap("k", "active", "rotated", TTL).await.unwrap());
        assert!(!cache.compare_and_swap("k", "active", "rotated", TTL).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn revoke_family_removes_members_and_blocks_links() {
        let cache = MemorySessionCache::new();
        cache.put("refresh:a", "1", TTL).await.unwrap();
        cache.put("refresh:b", "2", TTL).await.unwrap();
        cache.put("unrelated", "3", TTL).await.unwrap();
        assert!(cache.link_family("f", "refresh:a", TTL).await.unwrap());
        assert!(cache.link_family("f", "refresh:b", TTL).await.unwrap());
        assert!(!cache.is_family_revoked("f").await.unwrap());

        assert_eq!(cache.revoke_family("f", TTL).await.unwrap(), 2);
        assert!(cache.is_family_revoked("f").await.unwrap());
        assert_eq!(cache.get("refresh:a").await.unwrap(), None);
        assert_eq!(cache.get("unrelated").await.unwrap().as_deref(), Some("3"));
        assert!(!cache.link_family("f", "refresh:c", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn revoking_unknown_family_leaves_tombstone() {
        let cache = MemorySessionCache::new();
        assert_eq!(cache.revoke_family("ghost", TTL).await.unwrap(), 0);
        assert!(cache.is_family_revoked("ghost").await.unwrap());
    }
}
