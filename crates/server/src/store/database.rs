//! sea-orm backed Client Registry and Credential Store.

use crate::config::ClientConfig;
use crate::entity::{oauth2_client, oauth2_user};
use crate::error::StorageError;
use crate::oauth2::password::{
    hash_password, normalize_client_secret, verify_password, verify_unknown_account,
};
use crate::oauth2::types::{Client, User, UserStatus};
use crate::store::{ClientRegistry, CredentialStore};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
    max_failed_attempts: u32,
}

impl DatabaseStore {
    pub fn new(db: Arc<DatabaseConnection>, max_failed_attempts: u32) -> Self {
        Self {
            db,
            max_failed_attempts,
        }
    }

    /// Insert a configured client unless one with the same id exists.
    /// Returns whether a row was created.
    pub async fn ensure_client(&self, config: &ClientConfig) -> Result<bool, StorageError> {
        if oauth2_client::Entity::find_by_id(&config.client_id)
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let secret_hash = config
            .secret
            .as_deref()
            .map(normalize_client_secret)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let now = OffsetDateTime::now_utc();
        let client = oauth2_client::ActiveModel {
            id: Set(config.client_id.clone()),
            secret_hash: Set(secret_hash),
            name: Set(config
                .name
                .clone()
                .unwrap_or_else(|| config.client_id.clone())),
            redirect_uris: Set(serde_json::to_string(&config.redirect_uris)?),
            grant_types: Set(config.grant_types.join(" ")),
            scopes: Set(config.scopes.join(" ")),
            require_pkce: Set(config.require_pkce),
            enabled: Set(true),
            access_token_ttl: Set(config.access_token_ttl.map(|s| s as i64)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        client.insert(self.db.as_ref()).await?;
        tracing::info!(client_id = %config.client_id, "registered bootstrap client");
        Ok(true)
    }

    /// Create an active user with an Argon2 password hash.
    pub async fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        password: &str,
    ) -> Result<User, StorageError> {
        let password_hash =
            hash_password(password).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let user = oauth2_user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            email: Set(email.to_string()),
            name: Set(name.map(str::to_string)),
            password_hash: Set(password_hash),
            status: Set(UserStatus::Active.as_str().to_string()),
            failed_attempts: Set(0),
            created_at: Set(OffsetDateTime::now_utc()),
            last_login_at: Set(None),
        };
        let model = user.insert(self.db.as_ref()).await?;
        User::try_from(&model)
    }

    /// Change a user's status. Users are never deleted, only disabled.
    pub async fn set_user_status(
        &self,
        user_id: &str,
        status: UserStatus,
    ) -> Result<bool, StorageError> {
        let result = oauth2_user::Entity::update_many()
            .col_expr(oauth2_user::Column::Status, Expr::value(status.as_str()))
            .filter(oauth2_user::Column::Id.eq(user_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn record_failure(&self, user_id: &str) -> Result<(), StorageError> {
        oauth2_user::Entity::update_many()
            .col_expr(
                oauth2_user::Column::FailedAttempts,
                Expr::col(oauth2_user::Column::FailedAttempts).add(1),
            )
            .filter(oauth2_user::Column::Id.eq(user_id))
            .exec(self.db.as_ref())
            .await?;

        if self.max_failed_attempts == 0 {
            return Ok(());
        }
        let locked = oauth2_user::Entity::update_many()
            .col_expr(
                oauth2_user::Column::Status,
                Expr::value(UserStatus::Locked.as_str()),
            )
            .filter(oauth2_user::Column::Id.eq(user_id))
            .filter(oauth2_user::Column::Status.eq(UserStatus::Active.as_str()))
            .filter(oauth2_user::Column::FailedAttempts.gte(self.max_failed_attempts as i32))
            .exec(self.db.as_ref())
            .await?;
        if locked.rows_affected > 0 {
            tracing::warn!(user_id, "account locked after repeated login failures");
        }
        Ok(())
    }

    async fn record_success(&self, model: oauth2_user::Model) -> Result<(), StorageError> {
        let mut active: oauth2_user::ActiveModel = model.into();
        active.failed_attempts = Set(0);
        active.last_login_at = Set(Some(OffsetDateTime::now_utc()));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }
}

#[async_trait]
impl ClientRegistry for DatabaseStore {
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, StorageError> {
        oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .map(Client::try_from)
            .transpose()
    }
}

#[async_trait]
impl CredentialStore for DatabaseStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        oauth2_user::Entity::find_by_id(user_id)
            .one(self.db.as_ref())
            .await?
            .as_ref()
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, StorageError> {
        oauth2_user::Entity::find()
            .filter(oauth2_user::Column::Email.eq(identifier))
            .one(self.db.as_ref())
            .await?
            .as_ref()
            .map(User::try_from)
            .transpose()
    }

    async fn verify_user_credential(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<bool, StorageError> {
        let Some(model) = oauth2_user::Entity::find()
            .filter(oauth2_user::Column::Email.eq(identifier))
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(verify_unknown_account(secret));
        };
        if !User::try_from(&model)?.is_active() {
            return Ok(false);
        }
        if verify_password(secret, &model.password_hash) {
            self.record_success(model).await?;
            return Ok(true);
        }
        self.record_failure(&model.id).await?;
        Ok(false)
    }
}
