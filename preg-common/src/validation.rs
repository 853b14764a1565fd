//! National identity-number validation
//!
//! Rules apply in order and the first failure wins:
//! 1. At most 16 characters
//! 2. If non-empty, the first character is `1` or `2`
//! 3. If non-empty, every character is an ASCII digit
//!
//! The empty string is valid because the field is optional.

use serde::Serialize;
use thiserror::Error;

/// Maximum identity-number length
pub const MAX_IDENTITY_NUMBER_LEN: usize = 16;

/// Reason an identity number was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityNumberError {
    #[error("ID number cannot exceed 16 digits")]
    TooLong,

    #[error("ID number must start with 1 or 2")]
    BadLeadingDigit,

    #[error("ID number must contain only digits")]
    NonDigit,
}

/// Validate a raw identity-number input
///
/// # Examples
///
/// ```
/// use preg_common::validation::{validate_identity_number, IdentityNumberError};
///
/// assert!(validate_identity_number("123").is_ok());
/// assert!(validate_identity_number("").is_ok());
/// assert_eq!(validate_identity_number("3123"), Err(IdentityNumberError::BadLeadingDigit));
/// assert_eq!(validate_identity_number("12a3"), Err(IdentityNumberError::NonDigit));
/// ```
pub fn validate_identity_number(raw: &str) -> Result<(), IdentityNumberError> {
    // Length counts characters, not bytes
    if raw.chars().count() > MAX_IDENTITY_NUMBER_LEN {
        return Err(IdentityNumberError::TooLong);
    }

    if raw.is_empty() {
        return Ok(());
    }

    if !raw.starts_with('1') && !raw.starts_with('2') {
        return Err(IdentityNumberError::BadLeadingDigit);
    }

    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(IdentityNumberError::NonDigit);
    }

    Ok(())
}
