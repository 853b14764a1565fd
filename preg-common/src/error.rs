//! Error type shared by the registry crates

use thiserror::Error;

/// Result alias used across `preg-common`
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised while loading settings, opening the database or parsing
/// stored values
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the data folder failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable or malformed configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hashing a password failed or a stored hash is unreadable
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// A stored or submitted value outside its allowed set
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
