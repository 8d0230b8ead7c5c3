//! Actions of the flow create machine.

use std::sync::Arc;

use async_trait::async_trait;
use common::RetryPolicy;
use network::{
    Flow, FlowResourcesManager, FlowStatus, NetworkStore, NetworkStoreExt, PathComputer,
};

use super::{FlowCreateContext, FlowCreateFsm, FlowCreateState};
use crate::error::{FlowProcessingError, Result};
use crate::factory::FlowCommandFactory;
use crate::flow::{FlowEvent, FlowProcessingFsm, involved_switches, route_switches};
use crate::fsm::{Action, StateMachine};
use crate::service::FlowServiceConfig;
use crate::speaker::{RuleScope, SpeakerAction};

/// Checks the request against the current network and keeps it on the
/// instance.
pub struct ValidateFlowAction {
    store: Arc<dyn NetworkStore>,
}

impl ValidateFlowAction {
    pub fn new(store: Arc<dyn NetworkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Action<FlowCreateFsm> for ValidateFlowAction {
    async fn perform(
        &self,
        _from: FlowCreateState,
        _to: FlowCreateState,
        _event: FlowEvent,
        context: &FlowCreateContext,
        fsm: &mut FlowCreateFsm,
    ) -> Result<()> {
        let request = context
            .request
            .clone()
            .ok_or_else(|| FlowProcessingError::InvalidRequest("no flow request".to_string()))?;

        if request.flow_id != fsm.flow_id {
            return Err(FlowProcessingError::InvalidRequest(format!(
                "request is for flow {}, operation is for flow {}",
                request.flow_id, fsm.flow_id
            )));
        }
        if request.bandwidth == 0 {
            return Err(FlowProcessingError::InvalidRequest(
                "bandwidth must be positive".to_string(),
            ));
        }
        if request.source == request.destination {
            return Err(FlowProcessingError::InvalidRequest(
                "source and destination are the same endpoint".to_string(),
            ));
        }

        {
            let tx = self.store.begin().await?;
            if tx.find_flow(&request.flow_id).is_some() {
                return Err(FlowProcessingError::FlowAlreadyExists(request.flow_id));
            }
            for switch_id in [request.source.switch_id, request.destination.switch_id] {
                match tx.find_switch(switch_id) {
                    Some(switch) if switch.is_active() => {}
                    _ => return Err(FlowProcessingError::SwitchUnavailable(switch_id)),
                }
            }
        }

        fsm.request = Some(request);
        fsm.save_history("Flow was validated", "Flow request passed validation")
            .await;
        Ok(())
    }
}

/// Computes a route, reserves resources and persists the flow with both
/// paths.
pub struct AllocateResourcesAction {
    store: Arc<dyn NetworkStore>,
    pce: Arc<dyn PathComputer>,
    resources: FlowResourcesManager,
    transaction_retry: RetryPolicy,
    path_computation_retry: RetryPolicy,
}

impl AllocateResourcesAction {
    pub fn new(
        store: Arc<dyn NetworkStore>,
        pce: Arc<dyn PathComputer>,
        config: &FlowServiceConfig,
    ) -> Self {
        Self {
            store,
            pce,
            resources: FlowResourcesManager::new(),
            transaction_retry: config.transaction_retry,
            path_computation_retry: config.path_computation_retry,
        }
    }
}

#[async_trait]
impl Action<FlowCreateFsm> for AllocateResourcesAction {
    async fn perform(
        &self,
        _from: FlowCreateState,
        _to: FlowCreateState,
        _event: FlowEvent,
        _context: &FlowCreateContext,
        fsm: &mut FlowCreateFsm,
    ) -> Result<()> {
        let request = fsm
            .request
            .clone()
            .ok_or_else(|| FlowProcessingError::InvalidRequest("no flow request".to_string()))?;

        let mut flow = Flow::new(
            request.flow_id,
            request.source,
            request.destination,
            request.bandwidth,
        );
        flow.description = request.description;

        let route = self
            .path_computation_retry
            .run("get_path", || self.pce.get_path(&flow, &[]))
            .await?;

        let manager = self.resources;
        let (flow, forward, reverse, resources) = self
            .store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                let mut flow = flow.clone();
                tx.lock_switches(&route_switches(&flow, &route))?;

                let resources = manager.allocate(tx, &flow)?;
                let (forward, reverse) = resources.build_paths(&flow, &route);
                flow.forward_path_id = Some(forward.path_id);
                flow.reverse_path_id = Some(reverse.path_id);

                tx.create_flow(flow.clone())?;
                tx.save_path(forward.clone())?;
                tx.save_path(reverse.clone())?;
                tx.recompute_isls_for_path(&forward)?;
                tx.recompute_isls_for_path(&reverse)?;
                Ok((flow, forward, reverse, resources))
            })
            .await?;

        let description = format!(
            "Flow resources were allocated: cookie {}, forward path {}, reverse path {}",
            resources.unmasked_cookie, forward.path_id, reverse.path_id
        );
        tracing::debug!(flow_id = %flow.flow_id, hops = forward.segments.len(), "{description}");

        fsm.resources = Some(resources);
        fsm.paths = vec![forward, reverse];
        fsm.flow_persisted = true;
        fsm.save_history("Resources allocated", &description).await;
        Ok(())
    }
}

/// Sends install commands for every rule of both new paths.
pub struct InstallRulesAction;

#[async_trait]
impl Action<FlowCreateFsm> for InstallRulesAction {
    async fn perform(
        &self,
        _from: FlowCreateState,
        _to: FlowCreateState,
        _event: FlowEvent,
        _context: &FlowCreateContext,
        fsm: &mut FlowCreateFsm,
    ) -> Result<()> {
        let Some(request) = fsm.request.as_ref() else {
            return Err(FlowProcessingError::InvalidRequest(
                "no flow request".to_string(),
            ));
        };
        let mut flow = Flow::new(
            request.flow_id.clone(),
            request.source,
            request.destination,
            request.bandwidth,
        );
        flow.forward_path_id = fsm.paths.first().map(|p| p.path_id);
        flow.reverse_path_id = fsm.paths.get(1).map(|p| p.path_id);

        let commands = FlowCommandFactory::new(fsm.command_context.clone()).build_all(
            &flow,
            &fsm.paths,
            SpeakerAction::Install,
            RuleScope::All,
        );

        let description = format!("Sent {} install commands", commands.len());
        fsm.emit_commands(commands).await?;
        fsm.save_history("Installing rules", &description).await;
        Ok(())
    }
}

/// Marks the flow `Up`.
pub struct CompleteFlowCreateAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl CompleteFlowCreateAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowCreateFsm> for CompleteFlowCreateAction {
    async fn perform(
        &self,
        _from: FlowCreateState,
        _to: FlowCreateState,
        _event: FlowEvent,
        _context: &FlowCreateContext,
        fsm: &mut FlowCreateFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        self.store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                tx.update_flow_status(&flow_id, FlowStatus::Up)
            })
            .await?;

        tracing::info!(%flow_id, "flow created");
        fsm.save_history("Flow was created", &format!("Flow {flow_id} was created successfully"))
            .await;
        Ok(())
    }
}

/// Records why a flow that was never persisted could not be created.
pub struct HandleNotCreatedFlowAction;

#[async_trait]
impl Action<FlowCreateFsm> for HandleNotCreatedFlowAction {
    async fn perform(
        &self,
        _from: FlowCreateState,
        _to: FlowCreateState,
        _event: FlowEvent,
        _context: &FlowCreateContext,
        fsm: &mut FlowCreateFsm,
    ) -> Result<()> {
        let reason = fsm.failure_reason();
        tracing::warn!(flow_id = %fsm.flow_id, %reason, "failed to create flow");
        fsm.save_history("Failed to create the flow", &reason).await;
        Ok(())
    }
}

/// Sends remove commands for every install command issued so far.
pub struct RevertInstalledRulesAction;

#[async_trait]
impl Action<FlowCreateFsm> for RevertInstalledRulesAction {
    async fn perform(
        &self,
        _from: FlowCreateState,
        _to: FlowCreateState,
        _event: FlowEvent,
        _context: &FlowCreateContext,
        fsm: &mut FlowCreateFsm,
    ) -> Result<()> {
        let removes: Vec<_> = fsm
            .ledger
            .commands()
            .filter(|c| c.action == SpeakerAction::Install)
            .map(|c| c.to_remove())
            .collect();

        if removes.is_empty() {
            fsm.fire(FlowEvent::RulesRemoved);
            return Ok(());
        }

        let description = format!("Sent {} remove commands", removes.len());
        fsm.emit_commands(removes).await?;
        fsm.save_history("Reverting installed rules", &description)
            .await;
        Ok(())
    }
}

/// Deletes the new paths, releases the resources and leaves the flow
/// `Down` if this operation created it.
pub struct DeallocateFailedFlowAction {
    store: Arc<dyn NetworkStore>,
    resources: FlowResourcesManager,
    transaction_retry: RetryPolicy,
}

impl DeallocateFailedFlowAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            resources: FlowResourcesManager::new(),
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowCreateFsm> for DeallocateFailedFlowAction {
    async fn perform(
        &self,
        _from: FlowCreateState,
        _to: FlowCreateState,
        _event: FlowEvent,
        _context: &FlowCreateContext,
        fsm: &mut FlowCreateFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        let paths = fsm.paths.clone();
        let resources = fsm.resources;
        let manager = self.resources;
        let owns_flow = fsm.flow_persisted;

        self.store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                tx.lock_switches(&involved_switches(&paths))?;
                for path in &paths {
                    if tx.find_path(path.path_id).is_some() {
                        tx.delete_path(path.path_id)?;
                    }
                    tx.recompute_isls_for_path(path)?;
                }
                if let Some(resources) = &resources {
                    manager.deallocate(tx, resources);
                }
                // The record may belong to a concurrent create of the same id.
                if owns_flow
                    && let Some(mut flow) = tx.find_flow(&flow_id)
                {
                    flow.forward_path_id = None;
                    flow.reverse_path_id = None;
                    flow.status = FlowStatus::Down;
                    flow.time_modified = chrono::Utc::now();
                    tx.update_flow(flow)?;
                }
                Ok(())
            })
            .await?;
        fsm.resources = None;

        let reason = fsm.failure_reason();
        tracing::warn!(%flow_id, %reason, "flow creation reverted");
        fsm.save_history("Failed to create the flow", &reason).await;
        Ok(())
    }
}
