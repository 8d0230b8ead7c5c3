//! Flow processing error types.

use common::{CommandId, FlowId, SwitchId};
use network::{FlowStatus, PathComputerError, PersistenceError};
use thiserror::Error;

/// Errors raised while processing a flow operation.
///
/// Actions return these; the action wrapper turns them into the FSM's error
/// event, so they never reach the executor or the registry.
#[derive(Debug, Error)]
pub enum FlowProcessingError {
    /// The request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The flow does not exist.
    #[error("Flow {0} not found")]
    FlowNotFound(FlowId),

    /// A flow with this id already exists.
    #[error("Flow {0} already exists")]
    FlowAlreadyExists(FlowId),

    /// The flow is not in a status that allows the operation.
    #[error("Flow {flow_id} is {status}")]
    FlowNotReady { flow_id: FlowId, status: FlowStatus },

    /// An endpoint switch is missing or inactive.
    #[error("Switch {0} is not available")]
    SwitchUnavailable(SwitchId),

    /// A response-handling action was fired without a speaker response.
    #[error("No speaker response in the event context")]
    MissingResponse,

    /// A response referenced a command this operation never issued.
    #[error("Unknown command {0}")]
    UnknownCommand(CommandId),

    /// The operation lacks data an earlier step should have produced.
    #[error("Invalid operation state: {0}")]
    InvalidState(String),

    /// A command could not be handed to the speaker transport.
    #[error("Failed to send speaker command: {0}")]
    Transport(String),

    /// An FSM definition is inconsistent.
    #[error("Invalid FSM definition {fsm}: {reason}")]
    Definition { fsm: &'static str, reason: String },

    /// Persistence error.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Path computation error.
    #[error("Path computation error: {0}")]
    PathComputation(#[from] PathComputerError),
}

/// Convenience type alias for flow processing results.
pub type Result<T> = std::result::Result<T, FlowProcessingError>;
