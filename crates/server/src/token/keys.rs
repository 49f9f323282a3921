//! Versioned signing keys.
//!
//! Built once at startup and shared immutably. Exactly one key (the active
//! kid) signs; every configured key verifies, so a rotated-out key keeps
//! validating tokens it signed until they expire.

use crate::config::{MIN_SECRET_LEN, SigningConfig};
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("no signing keys configured")]
    Empty,
    #[error("duplicate key id '{0}'")]
    DuplicateKid(String),
    #[error("key '{0}' is shorter than {min} bytes", min = MIN_SECRET_LEN)]
    TooShort(String),
    #[error("active key id '{0}' is not configured")]
    UnknownActive(String),
}

struct VersionedKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

pub struct KeyManager {
    active_kid: String,
    keys: HashMap<String, VersionedKey>,
}

impl KeyManager {
    pub fn new<I, K, S>(active_kid: &str, keys: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: AsRef<[u8]>,
    {
        let mut map = HashMap::new();
        for (kid, secret) in keys {
            let kid = kid.into();
            let secret = secret.as_ref();
            if secret.len() < MIN_SECRET_LEN {
                return Err(KeyError::TooShort(kid));
            }
            let key = VersionedKey {
                encoding: EncodingKey::from_secret(secret),
                decoding: DecodingKey::from_secret(secret),
            };
            if map.insert(kid.clone(), key).is_some() {
                return Err(KeyError::DuplicateKid(kid));
            }
        }
        if map.is_empty() {
            return Err(KeyError::Empty);
        }
        if !map.contains_key(active_kid) {
            return Err(KeyError::UnknownActive(active_kid.to_string()));
        }
        Ok(Self {
            active_kid: active_kid.to_string(),
            keys: map,
        })
    }

    pub fn from_config(config: &SigningConfig) -> Result<Self, KeyError> {
        Self::new(
            &config.active_kid,
            config
                .keys
                .iter()
                .map(|k| (k.kid.clone(), k.secret.as_bytes())),
        )
    }

    /// The key new tokens are signed with.
    pub fn signing_key(&self) -> Option<(&str, &EncodingKey)> {
        self.keys
            .get(&self.active_kid)
            .map(|k| (self.active_kid.as_str(), &k.encoding))
    }

    pub fn verification_key(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid).map(|k| &k.decoding)
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kids: Vec<&String> = self.keys.keys().collect();
        kids.sort();
        f.debug_struct("KeyManager")
            .field("active_kid", &self.active_kid)
            .field("kids", &kids)
            .finish()
    }
}
