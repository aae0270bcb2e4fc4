//! Error types for the persistence layer.
//!
//! All errors are propagated via [`DbError`]. Nothing in this crate
//! swallows a failed write.

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be mapped back onto the value model.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A write violated a key or shape constraint.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
