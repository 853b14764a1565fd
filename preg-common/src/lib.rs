//! # People Registry Common Library
//!
//! Shared code for the people-registration service:
//! - Registration record model (`RegisteredPerson`)
//! - Identity-number validation
//! - Password hashing and session tokens
//! - Bootstrap configuration loading
//! - Database initialization

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod validation;

pub use error::{Error, Result};
pub use models::{HousingStatus, LocationSelection, RegisteredPerson};
pub use validation::{validate_identity_number, IdentityNumberError};
