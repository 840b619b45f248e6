//! services/companion/src/error.rs
//!
//! Defines the primary error type for the companion service.

use crate::config::ConfigError;
use minduni_core::{DomainError, JournalError, PortError, SessionError};

/// The primary error type for the `companion` service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// A value typed by the user could not be parsed.
    #[error("Invalid input: {0}")]
    Input(#[from] DomainError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., reading the console).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
