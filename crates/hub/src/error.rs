//! Hub error types.

use flowhs::FlowProcessingError;
use history::HistoryError;
use thiserror::Error;

/// Errors that stop the hub from starting or running.
#[derive(Debug, Error)]
pub enum HubError {
    /// A flow service could not be built.
    #[error("Flow service error: {0}")]
    Flow(#[from] FlowProcessingError),

    /// The history store could not be prepared.
    #[error("History store error: {0}")]
    History(#[from] HistoryError),

    /// Connecting to the database failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Binding or serving the HTTP listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Installing the metrics recorder failed.
    #[error("Metrics error: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, HubError>;
