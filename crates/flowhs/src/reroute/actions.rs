//! Actions of the flow reroute machine.

use std::sync::Arc;

use async_trait::async_trait;
use common::{PathId, RetryPolicy};
use network::{
    Flow, FlowPath, FlowResources, FlowResourcesManager, FlowStatus, NetworkStore,
    NetworkStoreExt, PathComputer,
};

use super::{FlowRerouteContext, FlowRerouteFsm, FlowRerouteState};
use crate::error::{FlowProcessingError, Result};
use crate::factory::FlowCommandFactory;
use crate::flow::{FlowEvent, FlowProcessingFsm, involved_switches, route_switches};
use crate::fsm::{Action, StateMachine};
use crate::ledger::CommandStatus;
use crate::service::FlowServiceConfig;
use crate::speaker::{RuleScope, SpeakerAction};

fn current_flow(fsm: &FlowRerouteFsm) -> Result<Flow> {
    fsm.flow
        .clone()
        .ok_or_else(|| FlowProcessingError::InvalidState("flow was not loaded".to_string()))
}

/// Loads the flow, marks it `InProgress` and skips the reroute when none of
/// the affected links is on its current paths.
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
impl Action<FlowRerouteFsm> for ValidateFlowAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        fsm.force = context.force;

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

        fsm.old_resources = match paths.as_slice() {
            [forward, reverse] => Some(FlowResources::from_paths(forward, reverse)),
            _ => None,
        };
        fsm.original_status = Some(original_status);
        fsm.flow = Some(flow);
        fsm.old_paths = paths;

        fsm.save_history("Flow was validated", &format!("Flow {flow_id} is being rerouted"))
            .await;

        let unaffected = !context.affected_isls.is_empty()
            && !fsm.old_paths.iter().any(|path| {
                context
                    .affected_isls
                    .iter()
                    .any(|isl| path.traverses(isl.src, isl.dst))
            });
        if unaffected && !context.force {
            tracing::info!(%flow_id, "flow does not use the affected links, skipping reroute");
            fsm.save_history(
                "Reroute is skipped",
                "The flow does not traverse any of the affected ISLs",
            )
            .await;
            fsm.fire(FlowEvent::PathUnchanged);
        }
        Ok(())
    }
}

/// Computes a new route and reserves resources for the new paths next to
/// the old ones.
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
impl Action<FlowRerouteFsm> for AllocateResourcesAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let flow = current_flow(fsm)?;
        let reuse: Vec<PathId> = fsm.old_paths.iter().map(|p| p.path_id).collect();

        let route = self
            .path_computation_retry
            .run("get_path", || self.pce.get_path(&flow, &reuse))
            .await?;

        let unchanged = match fsm.old_paths.as_slice() {
            [forward, reverse] => {
                forward.same_route(&route.forward) && reverse.same_route(&route.reverse)
            }
            _ => false,
        };
        if unchanged && !fsm.force {
            tracing::info!(flow_id = %flow.flow_id, "computed path equals the current one");
            fsm.save_history("Reroute is skipped", "Found the same path")
                .await;
            fsm.fire(FlowEvent::PathUnchanged);
            return Ok(());
        }

        let manager = self.resources;
        let (forward, reverse, resources) = self
            .store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                tx.lock_switches(&route_switches(&flow, &route))?;
                let resources = manager.allocate(tx, &flow)?;
                let (forward, reverse) = resources.build_paths(&flow, &route);
                tx.save_path(forward.clone())?;
                tx.save_path(reverse.clone())?;
                tx.recompute_isls_for_path(&forward)?;
                tx.recompute_isls_for_path(&reverse)?;
                Ok((forward, reverse, resources))
            })
            .await?;

        let description = format!(
            "New paths {} and {} were allocated with cookie {}",
            forward.path_id, reverse.path_id, resources.unmasked_cookie
        );
        fsm.new_resources = Some(resources);
        fsm.new_paths = vec![forward, reverse];
        fsm.save_history("Resources allocated", &description).await;
        Ok(())
    }
}

/// Sends install commands for the rules of the new paths within a scope.
pub struct InstallRulesAction {
    scope: RuleScope,
}

impl InstallRulesAction {
    pub fn new(scope: RuleScope) -> Self {
        Self { scope }
    }
}

#[async_trait]
impl Action<FlowRerouteFsm> for InstallRulesAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let flow = current_flow(fsm)?;
        let commands = FlowCommandFactory::new(fsm.command_context.clone()).build_all(
            &flow,
            &fsm.new_paths,
            SpeakerAction::Install,
            self.scope,
        );

        if commands.is_empty() {
            fsm.ledger.begin_batch();
            fsm.fire(FlowEvent::RulesInstalled);
            return Ok(());
        }

        let kind = match self.scope {
            RuleScope::Ingress => "ingress",
            RuleScope::NonIngress => "non ingress",
            RuleScope::All => "all",
        };
        let description = format!("Sent {} commands to install {kind} rules", commands.len());
        fsm.emit_commands(commands).await?;
        fsm.save_history("Install commands sent", &description).await;
        Ok(())
    }
}

/// Points the flow at the new paths.
pub struct SwapFlowPathsAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl SwapFlowPathsAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowRerouteFsm> for SwapFlowPathsAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let (forward, reverse) = match fsm.new_paths.as_slice() {
            [forward, reverse] => (forward.path_id, reverse.path_id),
            _ => {
                return Err(FlowProcessingError::InvalidState(
                    "no new paths to swap to".to_string(),
                ));
            }
        };

        let flow_id = fsm.flow_id.clone();
        let flow = self
            .store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                let mut flow = tx.get_flow(&flow_id)?;
                flow.forward_path_id = Some(forward);
                flow.reverse_path_id = Some(reverse);
                flow.time_modified = chrono::Utc::now();
                tx.update_flow(flow.clone())?;
                Ok(flow)
            })
            .await?;

        let old = fsm
            .old_paths
            .iter()
            .map(|p| p.path_id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        fsm.flow = Some(flow);
        fsm.paths_swapped = true;
        fsm.save_history(
            "Flow paths were swapped",
            &format!("Primary paths changed from [{old}] to [{forward}, {reverse}]"),
        )
        .await;
        Ok(())
    }
}

/// Sends remove commands for every rule of the old paths.
pub struct RemoveOldRulesAction;

#[async_trait]
impl Action<FlowRerouteFsm> for RemoveOldRulesAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let flow = current_flow(fsm)?;
        let commands = FlowCommandFactory::new(fsm.command_context.clone()).build_all(
            &flow,
            &fsm.old_paths,
            SpeakerAction::Remove,
            RuleScope::All,
        );

        if commands.is_empty() {
            fsm.ledger.begin_batch();
            fsm.fire(FlowEvent::RulesRemoved);
            return Ok(());
        }

        let description = format!("Sent {} commands to remove old rules", commands.len());
        fsm.emit_commands(commands).await?;
        fsm.save_history("Remove commands sent", &description).await;
        Ok(())
    }
}

/// Deletes the old paths and releases their resources.
pub struct CompleteOldPathRemovalAction {
    store: Arc<dyn NetworkStore>,
    resources: FlowResourcesManager,
    transaction_retry: RetryPolicy,
}

impl CompleteOldPathRemovalAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            resources: FlowResourcesManager::new(),
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowRerouteFsm> for CompleteOldPathRemovalAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let paths = fsm.old_paths.clone();
        let resources = fsm.old_resources;
        let manager = self.resources;

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
                Ok(())
            })
            .await?;
        fsm.old_resources = None;

        for path in &paths {
            fsm.save_history(
                "Flow path was removed",
                &format!("Flow path {} was removed", path.path_id),
            )
            .await;
        }
        Ok(())
    }
}

/// Finishes the reroute, including the case where it was not needed.
pub struct CompleteFlowRerouteAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl CompleteFlowRerouteAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowRerouteFsm> for CompleteFlowRerouteAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let status = if fsm.paths_swapped {
            FlowStatus::Up
        } else {
            fsm.original_status.unwrap_or(FlowStatus::Up)
        };

        let flow_id = fsm.flow_id.clone();
        self.store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                tx.update_flow_status(&flow_id, status)
            })
            .await?;

        if fsm.paths_swapped {
            tracing::info!(%flow_id, "flow rerouted");
            fsm.save_history("Flow was rerouted", &format!("Flow {flow_id} was rerouted successfully"))
                .await;
        } else {
            fsm.save_history("Flow reroute completed", &format!("Flow {flow_id} kept its paths"))
                .await;
        }
        Ok(())
    }
}

/// Sends remove commands for every rule installed on the new paths.
pub struct RevertNewRulesAction;

#[async_trait]
impl Action<FlowRerouteFsm> for RevertNewRulesAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let removes: Vec<_> = fsm
            .ledger
            .commands()
            .filter(|c| c.action == SpeakerAction::Install)
            .map(|c| c.to_remove())
            .collect();

        if removes.is_empty() {
            fsm.ledger.begin_batch();
            fsm.fire(FlowEvent::RulesRemoved);
            return Ok(());
        }

        let description = format!("Sent {} commands to remove new rules", removes.len());
        fsm.emit_commands(removes).await?;
        fsm.save_history("Reverting new rules", &description).await;
        Ok(())
    }
}

/// Deletes the new paths, releases their resources and restores the flow
/// status. The old paths stay primary.
pub struct RevertAllocationAction {
    store: Arc<dyn NetworkStore>,
    resources: FlowResourcesManager,
    transaction_retry: RetryPolicy,
}

impl RevertAllocationAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            resources: FlowResourcesManager::new(),
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowRerouteFsm> for RevertAllocationAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        let paths = fsm.new_paths.clone();
        let resources = fsm.new_resources;
        let original_status = fsm.original_status;
        let manager = self.resources;

        if !paths.is_empty() || original_status.is_some() {
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
                    if let Some(status) = original_status
                        && tx.find_flow(&flow_id).is_some()
                    {
                        tx.update_flow_status(&flow_id, status)?;
                    }
                    Ok(())
                })
                .await?;
        }
        fsm.new_resources = None;

        let reason = fsm.failure_reason();
        tracing::warn!(%flow_id, %reason, "failed to reroute flow");
        fsm.save_history("Failed to reroute the flow", &reason).await;
        Ok(())
    }
}

/// Records a failure after the swap. The flow stays on the new paths; old
/// rules that were not confirmed removed are listed in the history.
pub struct HandleNotCompletedRerouteAction {
    store: Arc<dyn NetworkStore>,
    transaction_retry: RetryPolicy,
}

impl HandleNotCompletedRerouteAction {
    pub fn new(store: Arc<dyn NetworkStore>, transaction_retry: RetryPolicy) -> Self {
        Self {
            store,
            transaction_retry,
        }
    }
}

#[async_trait]
impl Action<FlowRerouteFsm> for HandleNotCompletedRerouteAction {
    async fn perform(
        &self,
        _from: FlowRerouteState,
        _to: FlowRerouteState,
        _event: FlowEvent,
        _context: &FlowRerouteContext,
        fsm: &mut FlowRerouteFsm,
    ) -> Result<()> {
        let flow_id = fsm.flow_id.clone();
        let restored = self
            .store
            .transaction_with_retry(&self.transaction_retry, |tx| {
                tx.update_flow_status(&flow_id, FlowStatus::Up)
            })
            .await;
        if let Err(error) = restored {
            tracing::error!(%flow_id, %error, "failed to update flow status");
        }

        let leftovers: Vec<String> = fsm
            .ledger
            .batch()
            .filter(|c| c.action == SpeakerAction::Remove)
            .filter(|c| fsm.ledger.status(c.command_id) != Some(CommandStatus::Succeeded))
            .map(|c| format!("switch {} cookie {}", c.switch_id, c.rule.cookie))
            .collect();

        let mut description = fsm.failure_reason();
        if !leftovers.is_empty() {
            description.push_str(&format!(". Old rules left: {}", leftovers.join("; ")));
        }
        tracing::warn!(%flow_id, %description, "reroute finished on the new paths with errors");
        fsm.save_history("Failed to complete the reroute", &description)
            .await;
        Ok(())
    }
}
