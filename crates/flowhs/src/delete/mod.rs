//! Flow deletion.
//!
//! ```text
//! Initialized ─► FlowValidated ─► RemovingRules ─► PathsRemoved
//!     ─► ResourcesDeallocated ─► Finished
//! ```
//!
//! Any error or timeout ends in `FinishedWithError`, putting the flow back
//! to `Down` if it still exists.

pub mod actions;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use common::FlowId;
use network::{Flow, FlowPath, FlowResources, FlowStatus, NetworkStore};

use crate::carrier::{FlowCarrier, FlowOperation};
use crate::error::Result;
use crate::flow::{FlowContext, FlowEvent, FlowProcessingFsm, OnCommandResponseAction};
use crate::fsm::{Action, FsmCore, FsmDefinition, StateMachine};
use crate::ledger::CommandLedger;
use crate::service::FlowServiceConfig;
use crate::speaker::{CommandContext, SpeakerCommand, SpeakerResponse};

use actions::{
    CompleteFlowPathRemovalAction, DeallocateResourcesAction, HandleNotRemovedFlowAction,
    RemoveFlowAction, RemoveRulesAction, ValidateFlowAction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowDeleteState {
    Initialized,
    FlowValidated,
    RemovingRules,
    PathsRemoved,
    ResourcesDeallocated,
    Finished,
    FinishedWithError,
}

impl Display for FlowDeleteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowDeleteContext {
    pub speaker_response: Option<SpeakerResponse>,
}

impl FlowContext for FlowDeleteContext {
    fn with_response(response: SpeakerResponse) -> Self {
        Self {
            speaker_response: Some(response),
        }
    }

    fn speaker_response(&self) -> Option<&SpeakerResponse> {
        self.speaker_response.as_ref()
    }
}

/// One flow delete operation.
pub struct FlowDeleteFsm {
    core: FsmCore<FlowDeleteState, FlowEvent, FlowDeleteContext>,
    flow_id: FlowId,
    command_context: CommandContext,
    carrier: Arc<dyn FlowCarrier>,
    ledger: CommandLedger<SpeakerCommand>,
    /// Status before validation switched the flow to `InProgress`.
    original_status: Option<FlowStatus>,
    flow: Option<Flow>,
    /// Primary paths as found at validation, forward first.
    paths: Vec<FlowPath>,
    resources: Option<FlowResources>,
}

impl FlowDeleteFsm {
    pub fn new(
        command_context: CommandContext,
        carrier: Arc<dyn FlowCarrier>,
        flow_id: FlowId,
        speaker_retries: u32,
    ) -> Self {
        Self {
            core: FsmCore::new(FlowDeleteState::Initialized),
            flow_id,
            command_context,
            carrier,
            ledger: CommandLedger::new(speaker_retries),
            original_status: None,
            flow: None,
            paths: Vec::new(),
            resources: None,
        }
    }

    pub fn original_status(&self) -> Option<FlowStatus> {
        self.original_status
    }

    pub fn paths(&self) -> &[FlowPath] {
        &self.paths
    }

    /// Builds the transition table shared by all delete operations.
    pub fn definition(
        store: Arc<dyn NetworkStore>,
        config: &FlowServiceConfig,
    ) -> Result<FsmDefinition<Self>> {
        use FlowDeleteState::*;
        use FlowEvent::*;

        let on_response: Arc<dyn Action<Self>> =
            Arc::new(OnCommandResponseAction::new(RulesRemoved));
        let not_removed: Arc<dyn Action<Self>> = Arc::new(HandleNotRemovedFlowAction::new(
            store.clone(),
            config.transaction_retry,
        ));
        let live = [
            Initialized,
            FlowValidated,
            RemovingRules,
            PathsRemoved,
            ResourcesDeallocated,
        ];

        FsmDefinition::<Self>::builder("FlowDeleteFsm", Initialized)
            .success_state(Finished)
            .failure_state(FinishedWithError)
            .auto_advance(Next)
            .transition_with(
                Initialized,
                Next,
                FlowValidated,
                Arc::new(ValidateFlowAction::new(store.clone(), config.transaction_retry)),
            )
            .transition_with(FlowValidated, Next, RemovingRules, Arc::new(RemoveRulesAction))
            .transition_with(RemovingRules, ResponseReceived, RemovingRules, on_response.clone())
            .transition_with(RemovingRules, ErrorReceived, RemovingRules, on_response)
            .transition_with(
                RemovingRules,
                RulesRemoved,
                PathsRemoved,
                Arc::new(CompleteFlowPathRemovalAction::new(
                    store.clone(),
                    config.transaction_retry,
                )),
            )
            .transition_with(
                PathsRemoved,
                Next,
                ResourcesDeallocated,
                Arc::new(DeallocateResourcesAction::new(
                    store.clone(),
                    config.transaction_retry,
                )),
            )
            .transition_with(
                ResourcesDeallocated,
                Next,
                Finished,
                Arc::new(RemoveFlowAction::new(store, config.transaction_retry)),
            )
            .from_each(live, Timeout, FinishedWithError, Some(not_removed.clone()))
            .from_each(live, Error, FinishedWithError, Some(not_removed))
            .build()
    }
}

impl StateMachine for FlowDeleteFsm {
    type State = FlowDeleteState;
    type Event = FlowEvent;
    type Context = FlowDeleteContext;

    const ERROR_EVENT: FlowEvent = FlowEvent::Error;

    fn core(&self) -> &FsmCore<FlowDeleteState, FlowEvent, FlowDeleteContext> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FsmCore<FlowDeleteState, FlowEvent, FlowDeleteContext> {
        &mut self.core
    }
}

impl FlowProcessingFsm for FlowDeleteFsm {
    const OPERATION: FlowOperation = FlowOperation::Delete;

    fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    fn command_context(&self) -> &CommandContext {
        &self.command_context
    }

    fn carrier(&self) -> &Arc<dyn FlowCarrier> {
        &self.carrier
    }

    fn ledger(&self) -> &CommandLedger<SpeakerCommand> {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut CommandLedger<SpeakerCommand> {
        &mut self.ledger
    }
}
