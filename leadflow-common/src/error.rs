//! Shared error type for the LeadFlow crates
//!
//! Domain layers carry their own error enums (reconcile, scoring, the API);
//! this type covers the store and configuration plumbing they all sit on.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Store access failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem access failed (database directory, model artifact)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file missing, unreadable, or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied value did not parse (CRM source name, status)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored row failed to decode back into its domain type
    #[error("Internal error: {0}")]
    Internal(String),
}
