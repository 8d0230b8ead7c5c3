//! Outbound side of the engine: speaker transport, history sink, timeout
//! scheduling and northbound notifications.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::FlowId;
use history::HistoryEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{FlowProcessingError, Result};
use crate::speaker::{CommandContext, SpeakerCommand};

/// Kind of a flow operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowOperation {
    Create,
    Delete,
    Reroute,
}

impl FlowOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowOperation::Create => "create",
            FlowOperation::Delete => "delete",
            FlowOperation::Reroute => "reroute",
        }
    }
}

impl std::fmt::Display for FlowOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Failed { reason: String },
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }
}

/// Northbound notification sent once per finished operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowOperationResult {
    pub key: String,
    pub correlation_id: String,
    pub flow_id: FlowId,
    pub operation: FlowOperation,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

/// Everything an FSM sends to the outside world.
#[async_trait]
pub trait FlowCarrier: Send + Sync {
    /// Hands a command to the speaker transport.
    async fn send_speaker_request(&self, command: SpeakerCommand) -> Result<()>;

    /// Appends an entry to the flow history.
    async fn send_history_update(&self, entry: HistoryEntry);

    /// Arms the operation timeout for `key`.
    async fn start_timeout_callback(&self, key: &str);

    /// Disarms the operation timeout for `key`.
    async fn cancel_timeout_callback(&self, key: &str);

    async fn send_northbound_response(&self, result: FlowOperationResult);
}

#[derive(Debug, Default)]
struct RecordingState {
    commands: Vec<SpeakerCommand>,
    history: Vec<HistoryEntry>,
    results: Vec<FlowOperationResult>,
    active_timeouts: HashSet<String>,
    started_timeouts: Vec<String>,
    cancelled_timeouts: Vec<String>,
    fail_on_send: bool,
}

/// Carrier that records everything it is asked to do.
///
/// Used to drive FSMs without a transport; a test plays the speaker by
/// answering the recorded commands.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCarrier {
    state: Arc<RwLock<RecordingState>>,
}

impl InMemoryCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent speaker sends fail with a transport error.
    pub async fn set_fail_on_send(&self, fail: bool) {
        self.state.write().await.fail_on_send = fail;
    }

    /// Every command sent so far, in send order.
    pub async fn commands(&self) -> Vec<SpeakerCommand> {
        self.state.read().await.commands.clone()
    }

    /// Commands sent after the first `skip`.
    pub async fn commands_since(&self, skip: usize) -> Vec<SpeakerCommand> {
        self.state
            .read()
            .await
            .commands
            .iter()
            .skip(skip)
            .cloned()
            .collect()
    }

    pub async fn command_count(&self) -> usize {
        self.state.read().await.commands.len()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.clone()
    }

    /// History actions recorded for `flow_id`, in write order.
    pub async fn history_actions(&self, flow_id: &FlowId) -> Vec<String> {
        self.state
            .read()
            .await
            .history
            .iter()
            .filter(|entry| &entry.flow_id == flow_id)
            .map(|entry| entry.action.clone())
            .collect()
    }

    pub async fn results(&self) -> Vec<FlowOperationResult> {
        self.state.read().await.results.clone()
    }

    pub async fn has_active_timeout(&self, key: &str) -> bool {
        self.state.read().await.active_timeouts.contains(key)
    }

    pub async fn started_timeouts(&self) -> Vec<String> {
        self.state.read().await.started_timeouts.clone()
    }

    pub async fn cancelled_timeouts(&self) -> Vec<String> {
        self.state.read().await.cancelled_timeouts.clone()
    }
}

#[async_trait]
impl FlowCarrier for InMemoryCarrier {
    async fn send_speaker_request(&self, command: SpeakerCommand) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_send {
            return Err(FlowProcessingError::Transport(format!(
                "speaker for switch {} unreachable",
                command.switch_id
            )));
        }
        state.commands.push(command);
        Ok(())
    }

    async fn send_history_update(&self, entry: HistoryEntry) {
        self.state.write().await.history.push(entry);
    }

    async fn start_timeout_callback(&self, key: &str) {
        let mut state = self.state.write().await;
        state.active_timeouts.insert(key.to_string());
        state.started_timeouts.push(key.to_string());
    }

    async fn cancel_timeout_callback(&self, key: &str) {
        let mut state = self.state.write().await;
        state.active_timeouts.remove(key);
        state.cancelled_timeouts.push(key.to_string());
    }

    async fn send_northbound_response(&self, result: FlowOperationResult) {
        self.state.write().await.results.push(result);
    }
}

/// Builds the history entry for an action of the operation started by
/// `context`.
pub fn history_entry(
    context: &CommandContext,
    flow_id: &FlowId,
    action: impl Into<String>,
    description: impl Into<String>,
) -> HistoryEntry {
    HistoryEntry::new(
        context.correlation_id.clone(),
        flow_id.clone(),
        action,
        description,
    )
}
