use thiserror::Error;

/// Errors that can occur when interacting with the history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A history entry is missing a required field.
    #[error("History entry is missing required field: {0}")]
    MissingField(&'static str),

    /// An entry with the same id has already been written.
    #[error("Duplicate history entry: {0}")]
    DuplicateEntry(crate::EntryId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for history store operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
