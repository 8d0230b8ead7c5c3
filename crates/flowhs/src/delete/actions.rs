//! Actions of the flow delete machine.

use std::sync::Arc;

use async_trait::async_trait;
use common::RetryPolicy;
use network::{
    FlowPath, FlowResources, FlowResourcesManager, FlowStatus, NetworkStore, NetworkStoreExt,
};

use super::{FlowDeleteContext, FlowDeleteFsm, FlowDeleteState};
use crate::error::{FlowProcessingError, Result};
use crate::factory::FlowCommandFactory;
use crate::flow::{FlowEvent, FlowProcessingFsm, involved_switches};
use crate::fsm::{Action, StateMachine};
use crate::speaker::{RuleScope, SpeakerAction};

/// Loads the flow, refuses flows with an operation in flight and marks it
/// `InProgress`.
pub struct ValidateFlowAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl ValidateFlowAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowDeleteFsm> for ValidateFlowAction {
    async fn perform(
        &self,
        _from: FlowDeleteState,
        _to: FlowDeleteState,
        _event: FlowEvent,
        _context: &FlowDeleteContext,
        fsm: &mut FlowDeleteFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        let validated = self
            .store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                let Some(mut flow) = tx.find_flow(&flow_id) else {
                    return Ok(Err(FlowProcessingError::FlowNotFound(flow_id.clone())));
                };
                if flow.status == FlowStatus::InProgress {
                    return Ok(Err(FlowProcessingError::FlowNotReady {
                        flow_id: flow_id.clone(),
                        status: flow.status,
                    }));
                }

                let original_status = flow.status;
                let paths: Vec<FlowPath> = flow
                    .path_ids()
                    .into_iter()
                    .filter_map(|path_id| tx.find_path(path_id))
                    .collect();

                flow.status = FlowStatus::InProgress;
                flow.time_modified = chrono::Utc::now();
                tx.update_flow(flow.clone())?;
                Ok(Ok((flow, original_status, paths)))
            })
            .await?;
        let (flow, original_status, paths) = validated?;

        fsm.resources = match paths.as_slice() {
            [forward, reverse] => Some(FlowResources::from_paths(forward, reverse)),
            _ => None,
        };
        fsm.original_status = Some(original_status);
        fsm.flow = Some(flow);
        fsm.paths = paths;

        fsm.save_history("Flow was validated", &format!("Flow {flow_id} is being deleted"))
            .await;
        Ok(())
    }
}

/// Sends remove commands for every rule of the flow's paths, forward path
/// first.
pub struct RemoveRulesAction;

#[async_trait]
impl Action<FlowDeleteFsm> for RemoveRulesAction {
    async fn perform(
        &self,
        _from: FlowDeleteState,
        _to: FlowDeleteState,
        _event: FlowEvent,
        _context: &FlowDeleteContext,
        fsm: &mut FlowDeleteFsm,
    ) -> Result<()> {
        let Some(flow) = fsm.flow.as_ref() else {
            return Err(FlowProcessingError::FlowNotFound(fsm.flow_id.clone()));
        };
        let commands = FlowCommandFactory::new(fsm.command_context.clone()).build_all(
            flow,
            &fsm.paths,
            SpeakerAction::Remove,
            RuleScope::All,
        );

        if commands.is_empty() {
            tracing::debug!(flow_id = %fsm.flow_id, "flow has no rules to remove");
            fsm.fire(FlowEvent::RulesRemoved);
            return Ok(());
        }

        let description = format!("Sent {} remove commands", commands.len());
        fsm.emit_commands(commands).await?;
        fsm.save_history("Remove commands sent", &description).await;
        Ok(())
    }
}

/// Deletes the flow's paths and recomputes the bandwidth of every link
/// they ran over.
pub struct CompleteFlowPathRemovalAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl CompleteFlowPathRemovalAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowDeleteFsm> for CompleteFlowPathRemovalAction {
    async fn perform(
        &self,
        _from: FlowDeleteState,
        _to: FlowDeleteState,
        _event: FlowEvent,
        _context: &FlowDeleteContext,
        fsm: &mut FlowDeleteFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        let removed = self
            .store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                let mut flow = tx.get_flow(&flow_id)?;
                let paths: Vec<FlowPath> = flow
                    .path_ids()
                    .into_iter()
                    .filter_map(|path_id| tx.find_path(path_id))
                    .collect();

                tx.lock_switches(&involved_switches(&paths))?;

                for path in &paths {
                    tracing::debug!(%flow_id, path_id = %path.path_id, "removing flow path");
                    tx.delete_path(path.path_id)?;
                    tx.recompute_isls_for_path(path)?;
                }

                flow.forward_path_id = None;
                flow.reverse_path_id = None;
                tx.update_flow(flow)?;
                Ok(paths)
            })
            .await?;

        for path in &removed {
            fsm.save_history(
                "Flow path was removed",
                &format!("Flow path {} was removed", path.path_id),
            )
            .await;
        }
        Ok(())
    }
}

/// Returns the flow's cookie, meters and transit vlans to their pools.
pub struct DeallocateResourcesAction {
    store: Arc<dyn NetworkStore>,
    resources: FlowResourcesManager,
    transaction_retry: RetryPolicy,
}

impl DeallocateResourcesAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            resources: FlowResourcesManager::new(),
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowDeleteFsm> for DeallocateResourcesAction {
    async fn perform(
        &self,
        _from: FlowDeleteState,
        _to: FlowDeleteState,
        _event: FlowEvent,
        _context: &FlowDeleteContext,
        fsm: &mut FlowDeleteFsm,
    ) -> Result<()> {
        let Some(resources) = fsm.resources.take() else {
            tracing::debug!(flow_id = %fsm.flow_id, "no resources to deallocate");
            return Ok(());
        };

        let manager = self.resources;
        self.store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                manager.deallocate(tx, &resources);
                Ok(())
            })
            .await?;

        fsm.save_history(
            "Flow resources were deallocated",
            &format!(
                "Released cookie {} with its meters and transit vlans",
                resources.unmasked_cookie
            ),
        )
        .await;
        Ok(())
    }
}

/// Deletes the flow itself.
pub struct RemoveFlowAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl RemoveFlowAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowDeleteFsm> for RemoveFlowAction {
    async fn perform(
        &self,
        _from: FlowDeleteState,
        _to: FlowDeleteState,
        _event: FlowEvent,
        _context: &FlowDeleteContext,
        fsm: &mut FlowDeleteFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        self.store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                tx.delete_flow(&flow_id).map(|_| ())
            })
            .await?;

        tracing::info!(%flow_id, "flow removed");
        fsm.save_history("Flow was removed", &format!("Flow {flow_id} was removed"))
            .await;
        Ok(())
    }
}

/// Records the failure and puts a flow that validation had marked
/// `InProgress` back to `Down`.
pub struct HandleNotRemovedFlowAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl HandleNotRemovedFlowAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowDeleteFsm> for HandleNotRemovedFlowAction {
    async fn perform(
        &self,
        _from: FlowDeleteState,
        _to: FlowDeleteState,
        _event: FlowEvent,
        _context: &FlowDeleteContext,
        fsm: &mut FlowDeleteFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        if fsm.original_status.is_some() {
            let restored = self
                .store
                .transaction_with_retry(&self.transaction_retry, |tx| {
                    if tx.find_flow(&flow_id).is_some() {
                        tx.update_flow_status(&flow_id, FlowStatus::Down)?;
                    }
                    Ok(())
                })
                .await;
            if let Err(error) = restored {
                tracing::error!(%flow_id, %error, "failed to restore flow status");
            }
        }

        let reason = fsm.failure_reason();
        tracing::warn!(%flow_id, %reason, "failed to delete flow");
        fsm.save_history("Flow deletion failed", &reason).await;
        Ok(())
    }
}
