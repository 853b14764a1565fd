//! Password hashing and session tokens
//!
//! # Pure Functions
//!
//! This module contains ONLY pure functions. No HTTP framework or database
//! dependencies; those live in the service crate.
//!
//! Passwords are stored as Argon2id PHC strings (`users.password_hash`). The
//! string carries its own salt and cost parameters.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::RngCore;

use crate::{Error, Result};

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 6;

// ========================================
// Session Tokens
// ========================================

/// Generate a random bearer token for a new session (64 hex characters)
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ========================================
// Password Hashing
// ========================================

/// Hash a password with Argon2id and a fresh random salt
///
/// # Examples
///
/// ```
/// use preg_common::auth::hash_password;
///
/// let hash = hash_password("secret1").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash(format!("Failed to hash password: {e}")))
}

/// Check a password attempt against a stored PHC string
///
/// A stored value that is not a PHC string is an error, not a mismatch.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| Error::PasswordHash(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
