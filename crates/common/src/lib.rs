//! Shared types for the flow orchestration workspace.

pub mod retry;
pub mod types;

pub use retry::{Recoverable, RetryPolicy};
pub use types::{CommandId, Cookie, FlowId, MeterId, ParseSwitchIdError, PathId, SwitchId};
