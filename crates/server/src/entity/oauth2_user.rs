//! OAuth2 User entity - represents end users who can authenticate.

use crate::error::StorageError;
use crate::oauth2::types::User;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub email: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// `active`, `locked` or `disabled`. Users are never deleted.
    pub status: String,
    pub failed_attempts: i32,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&Model> for User {
    type Error = StorageError;

    fn try_from(model: &Model) -> Result<Self, Self::Error> {
        Ok(User {
            id: model.id.clone(),
            identifier: model.email.clone(),
            name: model.name.clone(),
            status: model.status.parse().map_err(StorageError::Serialization)?,
        })
    }
}
