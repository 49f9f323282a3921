//! Client Registry and Credential Store adapters.
//!
//! The engine only sees the traits; concrete adapters are chosen in `main`
//! and wrapped in [`Resilient`] so every call is bounded by a timeout.

pub mod database;
pub mod memory;
pub mod resilient;

use crate::error::StorageError;
use crate::oauth2::types::{Client, User};
use async_trait::async_trait;

pub use database::DatabaseStore;
pub use memory::{MemoryClientRegistry, MemoryCredentialStore};
pub use resilient::Resilient;

#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StorageError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StorageError>;

    async fn find_user_by_identifier(&self, identifier: &str)
    -> Result<Option<User>, StorageError>;

    /// Check a login secret. Failures count towards lockout; a locked or
    /// disabled account never verifies.
    async fn verify_user_credential(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<bool, StorageError>;
}
