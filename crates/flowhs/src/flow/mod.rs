//! Pieces shared by the flow create, delete and reroute machines.

pub mod actions;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use async_trait::async_trait;
use common::{FlowId, SwitchId};
use network::{Flow, FlowPath, PathPair};

use crate::carrier::{FlowCarrier, FlowOperation, history_entry};
use crate::error::Result;
use crate::fsm::StateMachine;
use crate::ledger::CommandLedger;
use crate::speaker::{CommandContext, SpeakerCommand, SpeakerResponse};

pub use actions::{EmitVerifyCommandsAction, OnCommandResponseAction, ValidateRulesAction};

/// Events understood by every flow machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowEvent {
    /// Auto-advance to the next step.
    Next,
    ResponseReceived,
    ErrorReceived,
    RulesInstalled,
    RulesValidated,
    MissingRuleFound,
    RulesRemoved,
    /// The computed path equals the current one; nothing to change.
    PathUnchanged,
    Timeout,
    Error,
}

impl Display for FlowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Every switch touched by `paths`, sorted and without duplicates.
pub fn involved_switches<'a>(paths: impl IntoIterator<Item = &'a FlowPath>) -> Vec<SwitchId> {
    let mut switches: Vec<_> = paths.into_iter().flat_map(FlowPath::switches).collect();
    switches.sort();
    switches.dedup();
    switches
}

/// Switches a route and the flow's endpoints run through, sorted and
/// without duplicates.
pub fn route_switches(flow: &Flow, route: &PathPair) -> Vec<SwitchId> {
    let mut switches: Vec<_> = route
        .forward
        .iter()
        .flat_map(|s| [s.src_switch, s.dst_switch])
        .chain([flow.source.switch_id, flow.destination.switch_id])
        .collect();
    switches.sort();
    switches.dedup();
    switches
}

/// Event payload of a flow machine.
pub trait FlowContext: Default + Send + Sync + 'static {
    /// Context carrying a speaker response.
    fn with_response(response: SpeakerResponse) -> Self;

    fn speaker_response(&self) -> Option<&SpeakerResponse>;
}

/// A state machine processing one operation on one flow.
#[async_trait]
pub trait FlowProcessingFsm: StateMachine<Event = FlowEvent, Context: FlowContext> {
    const OPERATION: FlowOperation;

    fn flow_id(&self) -> &FlowId;

    fn command_context(&self) -> &CommandContext;

    fn carrier(&self) -> &Arc<dyn FlowCarrier>;

    fn ledger(&self) -> &CommandLedger<SpeakerCommand>;

    fn ledger_mut(&mut self) -> &mut CommandLedger<SpeakerCommand>;

    /// Why the operation failed, as first recorded.
    fn failure_reason(&self) -> String {
        self.core()
            .error_reason()
            .unwrap_or("unknown error")
            .to_string()
    }

    /// Appends an entry to this flow's history under the operation's
    /// correlation id.
    async fn save_history(&self, action: &str, description: &str) {
        let entry = history_entry(self.command_context(), self.flow_id(), action, description);
        self.carrier().send_history_update(entry).await;
    }

    /// Starts a new ledger batch with `commands` and sends them.
    ///
    /// Every command is recorded as pending before the first one goes out,
    /// so a fast response always finds its command.
    async fn emit_commands(&mut self, commands: Vec<SpeakerCommand>) -> Result<()> {
        let ledger = self.ledger_mut();
        ledger.begin_batch();
        for command in &commands {
            ledger.issue(command.command_id, command.clone());
        }

        let carrier = self.carrier().clone();
        for command in commands {
            tracing::debug!(
                command_id = %command.command_id,
                switch_id = %command.switch_id,
                action = %command.action,
                "sending speaker command"
            );
            metrics::counter!("flowhs_speaker_commands_total", "action" => command.action.to_string())
                .increment(1);
            carrier.send_speaker_request(command).await?;
        }
        Ok(())
    }
}
