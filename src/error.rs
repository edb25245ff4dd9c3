//! Error types for the steward service.
//!
//! All fallible operations return [`Result<T>`] with [`StewardError`].
//! Settlement failures are always scoped to a single prediction or race;
//! nothing in this module represents a process-fatal condition.

use thiserror::Error;

/// Main error type for steward operations.
#[derive(Error, Debug)]
pub enum StewardError {
    // ==================== Infrastructure Errors ====================
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ==================== Domain Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    /// Result fetch failed for a reason worth retrying (network, bad
    /// gateway, truncated body). The race stays in the watch set.
    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    /// A published dividend amount could not be parsed. The affected bet
    /// keeps its win flag and pays zero.
    #[error("Malformed dividend: {0}")]
    MalformedDividend(String),

    /// An outcome already exists for this prediction. Statistics are not
    /// touched when this is raised.
    #[error("Outcome already recorded for prediction {0}")]
    DuplicateOutcome(String),

    #[error("Invalid check state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // ==================== General Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for steward operations.
pub type Result<T> = std::result::Result<T, StewardError>;
