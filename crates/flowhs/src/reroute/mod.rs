//! Flow reroute.
//!
//! New paths are installed next to the old ones: non-ingress rules first,
//! then ingress rules, each batch validated before moving on. Only then are
//! the flow's primary paths swapped and the old rules removed.
//!
//! ```text
//! Initialized ─► FlowValidated ─► ResourcesAllocated
//!     ─► InstallingNonIngressRules ─► ValidatingNonIngressRules
//!     ─► InstallingIngressRules ─► ValidatingIngressRules
//!     ─► PathsSwapped ─► RemovingOldRules ─► OldPathsRemoved ─► Finished
//! ```
//!
//! Failures up to and including the swap remove the new rules and release
//! the new resources (`RevertingNewRules`); failures after it leave the flow
//! on the new paths.

pub mod actions;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use common::FlowId;
use network::{Flow, FlowPath, FlowResources, FlowStatus, IslEndpoint, NetworkStore, PathComputer};

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
    AllocateResourcesAction, CompleteFlowRerouteAction, CompleteOldPathRemovalAction,
    HandleNotCompletedRerouteAction, InstallRulesAction, RemoveOldRulesAction,
    RevertAllocationAction, RevertNewRulesAction, SwapFlowPathsAction, ValidateFlowAction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowRerouteState {
    Initialized,
    FlowValidated,
    ResourcesAllocated,
    InstallingNonIngressRules,
    ValidatingNonIngressRules,
    InstallingIngressRules,
    ValidatingIngressRules,
    PathsSwapped,
    RemovingOldRules,
    OldPathsRemoved,
    RevertingNewRules,
    Finished,
    FinishedWithError,
}

impl Display for FlowRerouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// A link reported as failed or degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffectedIsl {
    pub src: IslEndpoint,
    pub dst: IslEndpoint,
}

impl AffectedIsl {
    pub fn new(src: IslEndpoint, dst: IslEndpoint) -> Self {
        Self { src, dst }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowRerouteContext {
    /// Links that triggered the reroute; empty means unconditional.
    pub affected_isls: Vec<AffectedIsl>,
    /// Reroute even onto an identical path.
    pub force: bool,
    pub speaker_response: Option<SpeakerResponse>,
}

impl FlowContext for FlowRerouteContext {
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

/// One flow reroute operation.
pub struct FlowRerouteFsm {
    core: FsmCore<FlowRerouteState, FlowEvent, FlowRerouteContext>,
    flow_id: FlowId,
    command_context: CommandContext,
    carrier: Arc<dyn FlowCarrier>,
    ledger: CommandLedger<SpeakerCommand>,
    force: bool,
    original_status: Option<FlowStatus>,
    flow: Option<Flow>,
    old_paths: Vec<FlowPath>,
    old_resources: Option<FlowResources>,
    new_paths: Vec<FlowPath>,
    new_resources: Option<FlowResources>,
    paths_swapped: bool,
}

impl FlowRerouteFsm {
    pub fn new(
        command_context: CommandContext,
        carrier: Arc<dyn FlowCarrier>,
        flow_id: FlowId,
        speaker_retries: u32,
    ) -> Self {
        Self {
            core: FsmCore::new(FlowRerouteState::Initialized),
            flow_id,
            command_context,
            carrier,
            ledger: CommandLedger::new(speaker_retries),
            force: false,
            original_status: None,
            flow: None,
            old_paths: Vec::new(),
            old_resources: None,
            new_paths: Vec::new(),
            new_resources: None,
            paths_swapped: false,
        }
    }

    pub fn old_paths(&self) -> &[FlowPath] {
        &self.old_paths
    }

    pub fn new_paths(&self) -> &[FlowPath] {
        &self.new_paths
    }

    pub fn paths_swapped(&self) -> bool {
        self.paths_swapped
    }

    /// Builds the transition table shared by all reroute operations.
    pub fn definition(
        store: Arc<dyn NetworkStore>,
        pce: Arc<dyn PathComputer>,
        config: &FlowServiceConfig,
    ) -> Result<FsmDefinition<Self>> {
        use FlowEvent::*;
        use FlowRerouteState::*;

        let retry = config.transaction_retry;
        let on_install: Arc<dyn Action<Self>> =
            Arc::new(OnCommandResponseAction::new(RulesInstalled));
        let on_remove: Arc<dyn Action<Self>> = Arc::new(OnCommandResponseAction::new(RulesRemoved));
        let validate_rules: Arc<dyn Action<Self>> =
            Arc::new(ValidateRulesAction::new(store.clone()));
        let complete: Arc<dyn Action<Self>> =
            Arc::new(CompleteFlowRerouteAction::new(store.clone(), retry));
        let revert_rules: Arc<dyn Action<Self>> = Arc::new(RevertNewRulesAction);
        let revert_allocation: Arc<dyn Action<Self>> =
            Arc::new(RevertAllocationAction::new(store.clone(), retry));
        let not_completed: Arc<dyn Action<Self>> =
            Arc::new(HandleNotCompletedRerouteAction::new(store.clone(), retry));

        let before_allocation = [Initialized, FlowValidated];
        let before_swap = [
            ResourcesAllocated,
            InstallingNonIngressRules,
            ValidatingNonIngressRules,
            InstallingIngressRules,
            ValidatingIngressRules,
            PathsSwapped,
        ];
        let after_swap = [RemovingOldRules, OldPathsRemoved];

        FsmDefinition::<Self>::builder("FlowRerouteFsm", Initialized)
            .success_state(Finished)
            .failure_state(FinishedWithError)
            .auto_advance(Next)
            .transition_with(
                Initialized,
                Next,
                FlowValidated,
                Arc::new(ValidateFlowAction::new(store.clone(), retry)),
            )
            .transition_with(FlowValidated, PathUnchanged, Finished, complete.clone())
            .transition_with(
                FlowValidated,
                Next,
                ResourcesAllocated,
                Arc::new(AllocateResourcesAction::new(store.clone(), pce, config)),
            )
            .transition_with(ResourcesAllocated, PathUnchanged, Finished, complete.clone())
            // non-ingress rules
            .transition_with(
                ResourcesAllocated,
                Next,
                InstallingNonIngressRules,
                Arc::new(InstallRulesAction::new(RuleScope::NonIngress)),
            )
            .transition_with(
                InstallingNonIngressRules,
                ResponseReceived,
                InstallingNonIngressRules,
                on_install.clone(),
            )
            .transition_with(
                InstallingNonIngressRules,
                ErrorReceived,
                InstallingNonIngressRules,
                on_install.clone(),
            )
            .transition_with(
                InstallingNonIngressRules,
                RulesInstalled,
                ValidatingNonIngressRules,
                Arc::new(EmitVerifyCommandsAction::new(RuleScope::NonIngress)),
            )
            .transition_with(
                ValidatingNonIngressRules,
                ResponseReceived,
                ValidatingNonIngressRules,
                validate_rules.clone(),
            )
            .transition_with(
                ValidatingNonIngressRules,
                ErrorReceived,
                ValidatingNonIngressRules,
                validate_rules.clone(),
            )
            // ingress rules
            .transition_with(
                ValidatingNonIngressRules,
                RulesValidated,
                InstallingIngressRules,
                Arc::new(InstallRulesAction::new(RuleScope::Ingress)),
            )
            .transition_with(
                InstallingIngressRules,
                ResponseReceived,
                InstallingIngressRules,
                on_install.clone(),
            )
            .transition_with(
                InstallingIngressRules,
                ErrorReceived,
                InstallingIngressRules,
                on_install,
            )
            .transition_with(
                InstallingIngressRules,
                RulesInstalled,
                ValidatingIngressRules,
                Arc::new(EmitVerifyCommandsAction::new(RuleScope::Ingress)),
            )
            .transition_with(
                ValidatingIngressRules,
                ResponseReceived,
                ValidatingIngressRules,
                validate_rules.clone(),
            )
            .transition_with(
                ValidatingIngressRules,
                ErrorReceived,
                ValidatingIngressRules,
                validate_rules,
            )
            // swap and clean up
            .transition_with(
                ValidatingIngressRules,
                RulesValidated,
                PathsSwapped,
                Arc::new(SwapFlowPathsAction::new(store.clone(), retry)),
            )
            .transition_with(
                PathsSwapped,
                Next,
                RemovingOldRules,
                Arc::new(RemoveOldRulesAction),
            )
            .transition_with(RemovingOldRules, ResponseReceived, RemovingOldRules, on_remove.clone())
            .transition_with(RemovingOldRules, ErrorReceived, RemovingOldRules, on_remove.clone())
            .transition_with(
                RemovingOldRules,
                RulesRemoved,
                OldPathsRemoved,
                Arc::new(CompleteOldPathRemovalAction::new(store, retry)),
            )
            .transition_with(OldPathsRemoved, Next, Finished, complete)
            // failures
            .from_each(before_allocation, Timeout, FinishedWithError, Some(revert_allocation.clone()))
            .from_each(before_allocation, Error, FinishedWithError, Some(revert_allocation.clone()))
            .from_each(before_swap, Timeout, RevertingNewRules, Some(revert_rules.clone()))
            .from_each(before_swap, Error, RevertingNewRules, Some(revert_rules.clone()))
            .from_each(
                [ValidatingNonIngressRules, ValidatingIngressRules],
                MissingRuleFound,
                RevertingNewRules,
                Some(revert_rules),
            )
            .transition_with(RevertingNewRules, ResponseReceived, RevertingNewRules, on_remove.clone())
            .transition_with(RevertingNewRules, ErrorReceived, RevertingNewRules, on_remove)
            .transition_with(RevertingNewRules, RulesRemoved, FinishedWithError, revert_allocation.clone())
            .transition_with(RevertingNewRules, Timeout, FinishedWithError, revert_allocation.clone())
            .transition_with(RevertingNewRules, Error, FinishedWithError, revert_allocation)
            .from_each(after_swap, Timeout, FinishedWithError, Some(not_completed.clone()))
            .from_each(after_swap, Error, FinishedWithError, Some(not_completed))
            .build()
    }
}

impl StateMachine for FlowRerouteFsm {
    type State = FlowRerouteState;
    type Event = FlowEvent;
    type Context = FlowRerouteContext;

    const ERROR_EVENT: FlowEvent = FlowEvent::Error;

    fn core(&self) -> &FsmCore<FlowRerouteState, FlowEvent, FlowRerouteContext> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FsmCore<FlowRerouteState, FlowEvent, FlowRerouteContext> {
        &mut self.core
    }
}

impl FlowProcessingFsm for FlowRerouteFsm {
    const OPERATION: FlowOperation = FlowOperation::Reroute;

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
