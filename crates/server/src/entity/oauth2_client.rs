//! OAuth2 Client entity.

use crate::error::StorageError;
use crate::oauth2::types::{Client, GrantType, Scopes};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Argon2 PHC string or `{sha256}` digest. None for public clients.
    pub secret_hash: Option<String>,
    /// Human-readable client name
    pub name: String,
    /// JSON array of allowed redirect URIs
    pub redirect_uris: String,
    /// Space-separated list of allowed grant types
    pub grant_types: String,
    /// Space-separated list of allowed scopes
    pub scopes: String,
    pub require_pkce: bool,
    pub enabled: bool,
    /// Access token lifetime override in seconds
    pub access_token_ttl: Option<i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse redirect URIs from JSON string
    pub fn redirect_uris_list(&self) -> Result<Vec<String>, StorageError> {
        Ok(serde_json::from_str(&self.redirect_uris)?)
    }

    /// Parse grant types, skipping values this server does not implement.
    pub fn grant_types_set(&self) -> BTreeSet<GrantType> {
        self.grant_types
            .split_whitespace()
            .filter_map(|g| match g.parse() {
                Ok(grant) => Some(grant),
                Err(e) => {
                    tracing::warn!(client_id = %self.id, error = %e, "ignoring grant type");
                    None
                }
            })
            .collect()
    }
}

impl TryFrom<Model> for Client {
    type Error = StorageError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let redirect_uris = model.redirect_uris_list()?;
        let grant_types = model.grant_types_set();
        Ok(Client {
            client_id: model.id,
            name: model.name,
            secret_hash: model.secret_hash,
            redirect_uris,
            grant_types,
            scopes: Scopes::parse(&model.scopes),
            require_pkce: model.require_pkce,
            enabled: model.enabled,
            access_token_ttl: model
                .access_token_ttl
                .filter(|s| *s > 0)
                .map(|s| Duration::from_secs(s as u64)),
        })
    }
}
