//! Token codec and signing keys.

pub mod codec;
pub mod keys;

pub use codec::{AccessClaims, IdClaims, TokenCodec, TokenError, generate_opaque_token, token_digest};
pub use keys::{KeyError, KeyManager};
