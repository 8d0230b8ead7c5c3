//! Flow creation.
//!
//! ```text
//! Initialized ─► FlowValidated ─► ResourcesAllocated ─► InstallingRules
//!     ─► ValidatingRules ─► Finished
//! ```
//!
//! Failures before resources exist end in `FinishedWithError` directly.
//! Later failures remove whatever was installed, release the resources and
//! leave the flow `Down`.

pub mod actions;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use common::FlowId;
use network::{FlowEndpoint, FlowPath, FlowResources, NetworkStore, PathComputer};
use serde::{Deserialize, Serialize};

use crate::carrier::{FlowCarrier, FlowOperation};
use crate::error::Result;
use crate::flow::{
    EmitVerifyCommandsAction, FlowContext, FlowEvent, FlowProcessingFsm, OnCommandResponseAction,
    ValidateRulesAction,
};
use crate::fsm::{Action, FsmCore, FsmDefinition, StateMachine};
use crate::ledger::CommandLedger;
use crate::service::FlowServiceConfig;
use crate::speaker::{CommandContext, RuleScope, SpeakerCommand, SpeakerResponse};

use actions::{
    AllocateResourcesAction, CompleteFlowCreateAction, DeallocateFailedFlowAction,
    HandleNotCreatedFlowAction, InstallRulesAction, RevertInstalledRulesAction,
    ValidateFlowAction,
};

/// A request to create a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRequest {
    pub flow_id: FlowId,
    pub source: FlowEndpoint,
    pub destination: FlowEndpoint,
    pub bandwidth: u64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowCreateState {
    Initialized,
    FlowValidated,
    ResourcesAllocated,
    InstallingRules,
    ValidatingRules,
    RemovingRules,
    Finished,
    FinishedWithError,
}

impl Display for FlowCreateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowCreateContext {
    pub request: Option<FlowRequest>,
    pub speaker_response: Option<SpeakerResponse>,
}

impl FlowContext for FlowCreateContext {
    fn with_response(response: SpeakerResponse) -> Self {
        Self {
            speaker_response: Some(response),
            ..Self::default()
        }
    }

    fn speaker_response(&self) -> Option<&SpeakerResponse> {
        self.speaker_response.as_ref()
    }
}

/// One flow create operation.
pub struct FlowCreateFsm {
    core: FsmCore<FlowCreateState, FlowEvent, FlowCreateContext>,
    flow_id: FlowId,
    command_context: CommandContext,
    carrier: Arc<dyn FlowCarrier>,
    ledger: CommandLedger<SpeakerCommand>,
    request: Option<FlowRequest>,
    resources: Option<FlowResources>,
    paths: Vec<FlowPath>,
    /// Set once this operation has committed the flow record.
    flow_persisted: bool,
}

impl FlowCreateFsm {
    pub fn new(
        command_context: CommandContext,
        carrier: Arc<dyn FlowCarrier>,
        flow_id: FlowId,
        speaker_retries: u32,
    ) -> Self {
        Self {
            core: FsmCore::new(FlowCreateState::Initialized),
            flow_id,
            command_context,
            carrier,
            ledger: CommandLedger::new(speaker_retries),
            request: None,
            resources: None,
            paths: Vec::new(),
            flow_persisted: false,
        }
    }

    pub fn request(&self) -> Option<&FlowRequest> {
        self.request.as_ref()
    }

    pub fn resources(&self) -> Option<&FlowResources> {
        self.resources.as_ref()
    }

    /// The new forward and reverse paths, once allocated.
    pub fn paths(&self) -> &[FlowPath] {
        &self.paths
    }

    /// Builds the transition table shared by all create operations.
    pub fn definition(
        store: Arc<dyn NetworkStore>,
        pce: Arc<dyn PathComputer>,
        config: &FlowServiceConfig,
    ) -> Result<FsmDefinition<Self>> {
        use FlowCreateState::*;
        use FlowEvent::*;

        let on_install: Arc<dyn Action<Self>> =
            Arc::new(OnCommandResponseAction::new(RulesInstalled));
        let validate_rules: Arc<dyn Action<Self>> =
            Arc::new(ValidateRulesAction::new(store.clone()));
        let on_revert: Arc<dyn Action<Self>> = Arc::new(OnCommandResponseAction::new(RulesRemoved));
        let not_created: Arc<dyn Action<Self>> = Arc::new(HandleNotCreatedFlowAction);
        let revert: Arc<dyn Action<Self>> = Arc::new(RevertInstalledRulesAction);
        let deallocate: Arc<dyn Action<Self>> = Arc::new(DeallocateFailedFlowAction::new(
            store.clone(),
            config.transaction_retry,
        ));
        let allocated = [ResourcesAllocated, InstallingRules, ValidatingRules];

        FsmDefinition::<Self>::builder("FlowCreateFsm", Initialized)
            .success_state(Finished)
            .failure_state(FinishedWithError)
            .auto_advance(Next)
            .transition_with(
                Initialized,
                Next,
                FlowValidated,
                Arc::new(ValidateFlowAction::new(store.clone())),
            )
            .transition_with(
                FlowValidated,
                Next,
                ResourcesAllocated,
                Arc::new(AllocateResourcesAction::new(store.clone(), pce, config)),
            )
            .transition_with(ResourcesAllocated, Next, InstallingRules, Arc::new(InstallRulesAction))
            .transition_with(InstallingRules, ResponseReceived, InstallingRules, on_install.clone())
            .transition_with(InstallingRules, ErrorReceived, InstallingRules, on_install)
            .transition_with(
                InstallingRules,
                RulesInstalled,
                ValidatingRules,
                Arc::new(EmitVerifyCommandsAction::new(RuleScope::All)),
            )
            .transition_with(ValidatingRules, ResponseReceived, ValidatingRules, validate_rules.clone())
            .transition_with(ValidatingRules, ErrorReceived, ValidatingRules, validate_rules)
            .transition_with(
                ValidatingRules,
                RulesValidated,
                Finished,
                Arc::new(CompleteFlowCreateAction::new(store, config.transaction_retry)),
            )
            .from_each([Initialized, FlowValidated], Timeout, FinishedWithError, Some(not_created.clone()))
            .from_each([Initialized, FlowValidated], Error, FinishedWithError, Some(not_created))
            .from_each(allocated, Timeout, RemovingRules, Some(revert.clone()))
            .from_each(allocated, Error, RemovingRules, Some(revert.clone()))
            .transition_with(ValidatingRules, MissingRuleFound, RemovingRules, revert)
            .transition_with(RemovingRules, ResponseReceived, RemovingRules, on_revert.clone())
            .transition_with(RemovingRules, ErrorReceived, RemovingRules, on_revert)
            .transition_with(RemovingRules, RulesRemoved, FinishedWithError, deallocate.clone())
            .transition_with(RemovingRules, Timeout, FinishedWithError, deallocate.clone())
            .transition_with(RemovingRules, Error, FinishedWithError, deallocate)
            .build()
    }
}

impl StateMachine for FlowCreateFsm {
    type State = FlowCreateState;
    type Event = FlowEvent;
    type Context = FlowCreateContext;

    const ERROR_EVENT: FlowEvent = FlowEvent::Error;

    fn core(&self) -> &FsmCore<FlowCreateState, FlowEvent, FlowCreateContext> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FsmCore<FlowCreateState, FlowEvent, FlowCreateContext> {
        &mut self.core
    }
}

impl FlowProcessingFsm for FlowCreateFsm {
    const OPERATION: FlowOperation = FlowOperation::Create;

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
