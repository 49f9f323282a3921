//! Credential hashing and verification.
//!
//! User passwords are Argon2id PHC strings. Client secrets may additionally be
//! stored as `{sha256}<hex>` digests, which is cheap enough for high-volume
//! machine clients. Every comparison is constant-time.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SHA256_PREFIX: &str = "{sha256}";
const NOOP_PREFIX: &str = "{noop}";

/// Hash verified when the identifier is unknown.
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("unknown-account-placeholder").ok());

/// Hash a password using Argon2id.
///
/// Returns the PHC-formatted hash string suitable for storage.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
///
/// Returns true if the password matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Spend the same Argon2 work as a real check for an identifier that has no
/// account, so response time does not reveal which accounts exist.
/// Always returns `false`.
pub fn verify_unknown_account(password: &str) -> bool {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
    false
}

/// `{sha256}<hex>` digest of a client secret.
pub fn sha256_secret_digest(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let mut out = String::with_capacity(SHA256_PREFIX.len() + 64);
    out.push_str(SHA256_PREFIX);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Turn a configured client secret into its stored form.
///
/// `{noop}` values are plaintext and get hashed; anything else is assumed to
/// already be a PHC string or a `{sha256}` digest.
pub fn normalize_client_secret(configured: &str) -> Result<String, argon2::password_hash::Error> {
    match configured.strip_prefix(NOOP_PREFIX) {
        Some(plain) => hash_password(plain),
        None => Ok(configured.to_string()),
    }
}

/// Verify a presented client secret against the stored hash.
pub fn verify_client_secret(presented: &str, stored: &str) -> bool {
    if stored.starts_with(SHA256_PREFIX) {
        let computed = sha256_secret_digest(presented);
        return computed.as_bytes().ct_eq(stored.as_bytes()).into();
    }
    verify_password(presented, stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_password() {
        let password = "my-secure-password-123!";
        let hash = hash_password(password).expect("Failed to hash password");

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(password, &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn test_hash_produces_different_salts() {
        let hash1 = hash_password("same-password").expect("Failed to hash");
        let hash2 = hash_password("same-password").expect("Failed to hash");
        assert_ne!(hash1, hash2);
        assert!(verify_password("same-password", &hash1));
        assert!(verify_password("same-password", &hash2));
    }

    #[test]
    fn test_verify_invalid_hash_format() {
        // Invalid hash formats should return false, not panic
        assert!(!verify_password("password", "not-a-valid-hash"));
        assert!(!verify_password("password", ""));
        assert!(!verify_password("password", "$invalid$hash$format"));
    }

    #[test]
    fn test_sha256_client_secret() {
        let stored = sha256_secret_digest("s3cret");
        assert!(stored.starts_with("{sha256}"));
        assert_eq!(stored.len(), "{sha256}".len() + 64);
        assert!(verify_client_secret("s3cret", &stored));
        assert!(!verify_client_secret("s3cret ", &stored));
    }

    #[test]
    fn test_noop_secret_is_hashed() {
        let stored = normalize_client_secret("{noop}secret").expect("hash");
        assert!(stored.starts_with("$argon2"));
        assert!(verify_client_secret("secret", &stored));
        assert!(!verify_client_secret("{noop}secret", &stored));
    }

    #[test]
    fn test_hashed_secret_passes_through() {
        let digest = sha256_secret_digest("abc");
        assert_eq!(normalize_client_secret(&digest).expect("normalize"), digest);
    }

    #[test]
    fn test_unknown_account_runs_argon2() {
        let dummy = DUMMY_HASH.as_deref().expect("dummy hash");
        assert!(dummy.starts_with("$argon2"));
        assert!(PasswordHash::new(dummy).is_ok());
        assert!(!verify_unknown_account("unknown-account-placeholder"));
        assert!(!verify_unknown_account("anything"));
    }
}
