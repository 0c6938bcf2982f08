//! Storage-specific error type wrapping sqlx errors.

use telederive_domain::error::DeriveError;

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// A stored JSON column could not be encoded or decoded.
    #[error("JSON column error")]
    Json(#[from] serde_json::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<StorageError> for DeriveError {
    fn from(err: StorageError) -> Self {
        Self::store(err)
    }
}
