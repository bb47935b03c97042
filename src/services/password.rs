//! Password hashing
//!
//! Argon2id with the argon2 crate's default parameters and a fresh random
//! salt per hash. Hashes are stored as PHC strings.
//!
//! Login for an unknown username still runs one verification against a
//! fixed hash (`verify_dummy`), so response time does not reveal which
//! usernames exist.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::OnceLock;

/// Hash a password, returning a PHC string
///
/// ```ignore
/// use gatehouse::services::password::hash_password;
///
/// let hash = hash_password("correct horse battery staple")?;
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    Ok(password_hash.to_string())
}

/// Check a password against a stored PHC hash
///
/// # Errors
///
/// Returns an error if the stored hash is malformed; a wrong password is
/// `Ok(false)`.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
    }
}

fn dummy_hash() -> Result<&'static str> {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();

    if let Some(hash) = DUMMY_HASH.get() {
        return Ok(hash);
    }
    let hash = hash_password("gatehouse-dummy-password").context("Failed to build dummy hash")?;
    Ok(DUMMY_HASH.get_or_init(|| hash))
}

/// Spend one verification's worth of work without a real account
pub fn verify_dummy(password: &str) {
    match dummy_hash() {
        Ok(hash) => {
            let _ = verify_password(password, hash);
        }
        Err(e) => tracing::warn!("{:#}", e),
    }
}
