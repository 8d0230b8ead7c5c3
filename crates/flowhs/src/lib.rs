//! Flow lifecycle orchestration.
//!
//! This crate drives create, delete and reroute operations on network flows
//! as asynchronous state machines. Each operation sends rule commands to the
//! switch speakers, tracks their responses and retries, validates what was
//! installed, and keeps the network model consistent when anything fails.
//!
//! The pieces are:
//! - [`fsm`]: a generic table-driven state machine framework
//! - [`create`], [`delete`], [`reroute`]: the flow machines and their actions
//! - [`service`]: registries that own live instances and route events to them
//! - [`carrier`]: the outbound port (speaker, history, timeouts, northbound)

pub mod carrier;
pub mod create;
pub mod delete;
pub mod error;
pub mod factory;
pub mod flow;
pub mod fsm;
pub mod ledger;
pub mod reroute;
pub mod service;
pub mod speaker;
pub mod validation;

pub use carrier::{
    FlowCarrier, FlowOperation, FlowOperationResult, InMemoryCarrier, OperationOutcome,
};
pub use create::{FlowCreateContext, FlowCreateFsm, FlowCreateState, FlowRequest};
pub use delete::{FlowDeleteContext, FlowDeleteFsm, FlowDeleteState};
pub use error::{FlowProcessingError, Result};
pub use factory::FlowCommandFactory;
pub use flow::{FlowContext, FlowEvent, FlowProcessingFsm};
pub use fsm::{Action, FsmCore, FsmDefinition, FsmExecutor, StateMachine};
pub use ledger::{CommandLedger, CommandStatus, Completion, ErrorOutcome};
pub use reroute::{AffectedIsl, FlowRerouteContext, FlowRerouteFsm, FlowRerouteState};
pub use service::{
    FlowCreateService, FlowDeleteService, FlowRerouteService, FlowServiceConfig, FsmRegistry,
};
pub use speaker::{
    CommandContext, FlowSegmentRule, RuleScope, SegmentKind, SpeakerAction, SpeakerCommand,
    SpeakerErrorCode, SpeakerResponse,
};
pub use validation::{IngressRulesValidator, NonIngressRulesValidator, RulesValidator};
