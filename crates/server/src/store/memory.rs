use crate::error::StorageError;
use crate::oauth2::password::{hash_password, verify_password, verify_unknown_account};
use crate::oauth2::types::{Client, User, UserStatus};
use crate::store::{ClientRegistry, CredentialStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryClientRegistry {
    clients: Arc<DashMap<String, Client>>,
}

impl MemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Client) {
        self.clients.insert(client.client_id.clone(), client);
    }
}

#[async_trait]
impl ClientRegistry for MemoryClientRegistry {
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }
}

struct StoredUser {
    user: User,
    password_hash: String,
    failed_attempts: u32,
}

#[derive(Clone)]
pub struct MemoryCredentialStore {
    users: Arc<DashMap<String, StoredUser>>,
    by_identifier: Arc<DashMap<String, String>>,
    max_failed_attempts: u32,
}

impl MemoryCredentialStore {
    pub fn new(max_failed_attempts: u32) -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            by_identifier: Arc::new(DashMap::new()),
            max_failed_attempts,
        }
    }

    pub fn insert_user(
        &self,
        user: User,
        password: &str,
    ) -> Result<(), argon2::password_hash::Error> {
        let password_hash = hash_password(password)?;
        self.by_identifier
            .insert(user.identifier.clone(), user.id.clone());
        self.users.insert(
            user.id.clone(),
            StoredUser {
                user,
                password_hash,
                failed_attempts: 0,
            },
        );
        Ok(())
    }

    pub fn set_status(&self, user_id: &str, status: UserStatus) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut stored) => {
                stored.user.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        Ok(self.users.get(user_id).map(|s| s.user.clone()))
    }

    async fn find_user_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, StorageError> {
        let Some(user_id) = self.by_identifier.get(identifier).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.find_user(&user_id).await
    }

    async fn verify_user_credential(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<bool, StorageError> {
        let Some(user_id) = self.by_identifier.get(identifier).map(|id| id.clone()) else {
            return Ok(verify_unknown_account(secret));
        };
        let Some(mut stored) = self.users.get_mut(&user_id) else {
            return Ok(verify_unknown_account(secret));
        };
        if !stored.user.is_active() {
            return Ok(false);
        }
        if verify_password(secret, &stored.password_hash) {
            stored.failed_attempts = 0;
            return Ok(true);
        }
        stored.failed_attempts += 1;
        if self.max_failed_attempts > 0 && stored.failed_attempts >= self.max_failed_attempts {
            stored.user.status = UserStatus::Locked;
            tracing::warn!(user_id = %user_id, "account locked after repeated login failures");
        }
        Ok(false)
    }
}
