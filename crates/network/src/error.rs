//! Persistence and path computation error types.

use common::{FlowId, PathId, Recoverable, SwitchId};
use thiserror::Error;

use crate::model::IslEndpoint;

/// Errors raised by the network repository.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The flow does not exist.
    #[error("Flow not found: {0}")]
    FlowNotFound(FlowId),

    /// A flow with this id already exists.
    #[error("Flow already exists: {0}")]
    FlowAlreadyExists(FlowId),

    /// The flow path does not exist.
    #[error("Flow path not found: {0}")]
    PathNotFound(PathId),

    /// The switch does not exist.
    #[error("Switch not found: {0}")]
    SwitchNotFound(SwitchId),

    /// No ISL connects the two endpoints.
    #[error("ISL not found: {src} - {dst}")]
    IslNotFound { src: IslEndpoint, dst: IslEndpoint },

    /// A resource pool has no free values left.
    #[error("Resource pool exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// Another transaction modified data this transaction wrote or locked.
    #[error("Transaction conflict on {0}")]
    TransactionConflict(String),

    /// The storage backend is temporarily unreachable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl Recoverable for PersistenceError {
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PersistenceError::TransactionConflict(_) | PersistenceError::Unavailable(_)
        )
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Errors raised by a path computer.
#[derive(Debug, Error)]
pub enum PathComputerError {
    /// The computation failed for a transient reason and may succeed later.
    #[error("Path computation failed: {0}")]
    Recoverable(String),

    /// No path satisfies the flow's constraints.
    #[error("Unroutable flow {flow_id}: {reason}")]
    Unroutable { flow_id: FlowId, reason: String },

    /// The network view could not be read.
    #[error("Failed to read network: {0}")]
    Persistence(#[from] PersistenceError),
}

impl Recoverable for PathComputerError {
    fn is_recoverable(&self) -> bool {
        match self {
            PathComputerError::Recoverable(_) => true,
            PathComputerError::Unroutable { .. } => false,
            PathComputerError::Persistence(e) => e.is_recoverable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_recoverable() {
        assert!(PersistenceError::TransactionConflict("flow f1".into()).is_recoverable());
        assert!(PersistenceError::Unavailable("down".into()).is_recoverable());
        assert!(!PersistenceError::FlowNotFound(FlowId::new("f1")).is_recoverable());
    }

    #[test]
    fn unroutable_is_not_recoverable() {
        let err = PathComputerError::Unroutable {
            flow_id: FlowId::new("f1"),
            reason: "no path".into(),
        };
        assert!(!err.is_recoverable());
        assert!(PathComputerError::Recoverable("busy".into()).is_recoverable());
    }
}
