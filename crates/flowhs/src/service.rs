//! Entry points that own the live FSM instances.
//!
//! Each service keeps one instance per operation key. Requests create an
//! instance and drive it as far as it can go; speaker responses and timeouts
//! are routed to the instance by key. An instance is evicted, its timeout
//! cancelled and the requester notified exactly once, as soon as it reaches a
//! terminal state.

use std::collections::HashMap;
use std::sync::Arc;

use common::{FlowId, RetryPolicy};
use network::{NetworkStore, PathComputer};
use tokio::sync::{Mutex, RwLock};

use crate::carrier::{FlowCarrier, FlowOperationResult, OperationOutcome};
use crate::create::{FlowCreateContext, FlowCreateFsm, FlowRequest};
use crate::delete::{FlowDeleteContext, FlowDeleteFsm};
use crate::error::Result;
use crate::flow::{FlowContext, FlowEvent, FlowProcessingFsm};
use crate::fsm::FsmExecutor;
use crate::reroute::{AffectedIsl, FlowRerouteContext, FlowRerouteFsm};
use crate::speaker::{CommandContext, SpeakerResponse};

/// Settings shared by the flow services.
#[derive(Debug, Clone, Copy)]
pub struct FlowServiceConfig {
    /// Re-sends of a speaker command that failed with a recoverable error.
    pub speaker_retries: u32,
    /// Applied to every storage transaction.
    pub transaction_retry: RetryPolicy,
    /// Applied to path computation.
    pub path_computation_retry: RetryPolicy,
}

impl Default for FlowServiceConfig {
    fn default() -> Self {
        Self {
            speaker_retries: RetryPolicy::DEFAULT_MAX_RETRIES,
            transaction_retry: RetryPolicy::default(),
            path_computation_retry: RetryPolicy::default(),
        }
    }
}

/// Live instances of one machine kind, keyed by operation key.
pub struct FsmRegistry<M: FlowProcessingFsm> {
    executor: FsmExecutor<M>,
    carrier: Arc<dyn FlowCarrier>,
    fsms: RwLock<HashMap<String, Arc<Mutex<M>>>>,
}

impl<M: FlowProcessingFsm> FsmRegistry<M> {
    pub fn new(executor: FsmExecutor<M>, carrier: Arc<dyn FlowCarrier>) -> Self {
        Self {
            executor,
            carrier,
            fsms: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `fsm` under `key` and drives it from its initial state.
    ///
    /// Returns false, leaving the running instance untouched, when `key` is
    /// already in use.
    pub async fn handle_request(&self, key: &str, fsm: M, context: M::Context) -> bool {
        let instance = Arc::new(Mutex::new(fsm));
        let mut fsm = instance.lock().await;

        {
            let mut fsms = self.fsms.write().await;
            if fsms.contains_key(key) {
                tracing::warn!(key, operation = %M::OPERATION, "operation key already in use, ignoring request");
                metrics::counter!("flowhs_duplicate_requests_total", "operation" => M::OPERATION.as_str())
                    .increment(1);
                return false;
            }
            fsms.insert(key.to_string(), instance.clone());
        }

        metrics::counter!("flowhs_fsm_started_total", "operation" => M::OPERATION.as_str())
            .increment(1);
        tracing::info!(key, flow_id = %fsm.flow_id(), operation = %M::OPERATION, "operation started");

        self.carrier.start_timeout_callback(key).await;
        self.executor.fire(&mut fsm, FlowEvent::Next, context).await;
        self.remove_if_finished(key, &instance, &fsm).await;
        true
    }

    /// Routes a speaker response to the instance registered under `key`.
    ///
    /// Returns false when no live instance owns the key.
    pub async fn handle_async_response(&self, key: &str, response: SpeakerResponse) -> bool {
        let Some(instance) = self.get(key).await else {
            tracing::warn!(key, command_id = %response.command_id, "response for unknown operation, ignoring");
            return false;
        };

        let mut fsm = instance.lock().await;
        if self.executor.definition().is_terminal(fsm.current_state()) {
            tracing::debug!(key, "response for finished operation, ignoring");
            return false;
        }

        let event = if response.success {
            FlowEvent::ResponseReceived
        } else {
            FlowEvent::ErrorReceived
        };
        self.executor
            .fire(&mut fsm, event, M::Context::with_response(response))
            .await;
        self.remove_if_finished(key, &instance, &fsm).await;
        true
    }

    /// Delivers the operation timeout to the instance under `key`.
    pub async fn handle_timeout(&self, key: &str) -> bool {
        let Some(instance) = self.get(key).await else {
            tracing::debug!(key, "timeout for unknown operation, ignoring");
            return false;
        };

        let mut fsm = instance.lock().await;
        if self.executor.definition().is_terminal(fsm.current_state()) {
            return false;
        }

        tracing::warn!(key, flow_id = %fsm.flow_id(), state = %fsm.current_state(), "operation timed out");
        metrics::counter!("flowhs_operation_timeouts_total", "operation" => M::OPERATION.as_str())
            .increment(1);
        fsm.core_mut().record_error("Operation timed out");
        self.executor
            .fire(&mut fsm, FlowEvent::Timeout, M::Context::default())
            .await;
        self.remove_if_finished(key, &instance, &fsm).await;
        true
    }

    pub async fn active_count(&self) -> usize {
        self.fsms.read().await.len()
    }

    pub async fn is_active(&self, key: &str) -> bool {
        self.fsms.read().await.contains_key(key)
    }

    /// Current state of the instance under `key`, if still live.
    pub async fn state(&self, key: &str) -> Option<M::State> {
        let instance = self.get(key).await?;
        let fsm = instance.lock().await;
        Some(fsm.current_state())
    }

    async fn get(&self, key: &str) -> Option<Arc<Mutex<M>>> {
        self.fsms.read().await.get(key).cloned()
    }

    async fn remove_if_finished(&self, key: &str, instance: &Arc<Mutex<M>>, fsm: &M) {
        let state = fsm.current_state();
        let definition = self.executor.definition();
        if !definition.is_terminal(state) {
            return;
        }

        {
            let mut fsms = self.fsms.write().await;
            match fsms.get(key) {
                Some(current) if Arc::ptr_eq(current, instance) => {
                    fsms.remove(key);
                }
                _ => return,
            }
        }

        self.carrier.cancel_timeout_callback(key).await;

        let outcome = if definition.is_success(state) {
            OperationOutcome::Success
        } else {
            OperationOutcome::Failed {
                reason: fsm.failure_reason(),
            }
        };
        let outcome_label = if outcome.is_success() { "success" } else { "failure" };

        metrics::counter!(
            "flowhs_fsm_finished_total",
            "operation" => M::OPERATION.as_str(),
            "outcome" => outcome_label
        )
        .increment(1);
        metrics::histogram!("flowhs_operation_duration_seconds", "operation" => M::OPERATION.as_str())
            .record(fsm.core().elapsed().as_secs_f64());
        tracing::info!(
            key,
            flow_id = %fsm.flow_id(),
            operation = %M::OPERATION,
            %state,
            outcome = outcome_label,
            "operation finished"
        );

        self.carrier
            .send_northbound_response(FlowOperationResult {
                key: key.to_string(),
                correlation_id: fsm.command_context().correlation_id.clone(),
                flow_id: fsm.flow_id().clone(),
                operation: M::OPERATION,
                outcome,
            })
            .await;
    }
}

/// Creates flows.
pub struct FlowCreateService {
    registry: FsmRegistry<FlowCreateFsm>,
    carrier: Arc<dyn FlowCarrier>,
    config: FlowServiceConfig,
}

impl FlowCreateService {
    pub fn new(
        carrier: Arc<dyn FlowCarrier>,
        store: Arc<dyn NetworkStore>,
        pce: Arc<dyn PathComputer>,
        config: FlowServiceConfig,
    ) -> Result<Self> {
        let definition = FlowCreateFsm::definition(store, pce, &config)?;
        Ok(Self {
            registry: FsmRegistry::new(FsmExecutor::new(Arc::new(definition)), carrier.clone()),
            carrier,
            config,
        })
    }

    #[tracing::instrument(skip(self, context, request), fields(flow_id = %request.flow_id))]
    pub async fn handle_request(
        &self,
        key: &str,
        context: CommandContext,
        request: FlowRequest,
    ) -> bool {
        let fsm = FlowCreateFsm::new(
            context,
            self.carrier.clone(),
            request.flow_id.clone(),
            self.config.speaker_retries,
        );
        let context = FlowCreateContext {
            request: Some(request),
            speaker_response: None,
        };
        self.registry.handle_request(key, fsm, context).await
    }

    pub async fn handle_async_response(&self, key: &str, response: SpeakerResponse) -> bool {
        self.registry.handle_async_response(key, response).await
    }

    pub async fn handle_timeout(&self, key: &str) -> bool {
        self.registry.handle_timeout(key).await
    }

    pub fn registry(&self) -> &FsmRegistry<FlowCreateFsm> {
        &self.registry
    }
}

/// Deletes flows.
pub struct FlowDeleteService {
    registry: FsmRegistry<FlowDeleteFsm>,
    carrier: Arc<dyn FlowCarrier>,
    config: FlowServiceConfig,
}

impl FlowDeleteService {
    pub fn new(
        carrier: Arc<dyn FlowCarrier>,
        store: Arc<dyn NetworkStore>,
        config: FlowServiceConfig,
    ) -> Result<Self> {
        let definition = FlowDeleteFsm::definition(store, &config)?;
        Ok(Self {
            registry: FsmRegistry::new(FsmExecutor::new(Arc::new(definition)), carrier.clone()),
            carrier,
            config,
        })
    }

    #[tracing::instrument(skip(self, context))]
    pub async fn handle_request(&self, key: &str, context: CommandContext, flow_id: FlowId) -> bool {
        let fsm = FlowDeleteFsm::new(
            context,
            self.carrier.clone(),
            flow_id,
            self.config.speaker_retries,
        );
        self.registry
            .handle_request(key, fsm, FlowDeleteContext::default())
            .await
    }

    pub async fn handle_async_response(&self, key: &str, response: SpeakerResponse) -> bool {
        self.registry.handle_async_response(key, response).await
    }

    pub async fn handle_timeout(&self, key: &str) -> bool {
        self.registry.handle_timeout(key).await
    }

    pub fn registry(&self) -> &FsmRegistry<FlowDeleteFsm> {
        &self.registry
    }
}

/// Moves flows onto new paths.
pub struct FlowRerouteService {
    registry: FsmRegistry<FlowRerouteFsm>,
    carrier: Arc<dyn FlowCarrier>,
    config: FlowServiceConfig,
}

impl FlowRerouteService {
    pub fn new(
        carrier: Arc<dyn FlowCarrier>,
        store: Arc<dyn NetworkStore>,
        pce: Arc<dyn PathComputer>,
        config: FlowServiceConfig,
    ) -> Result<Self> {
        let definition = FlowRerouteFsm::definition(store, pce, &config)?;
        Ok(Self {
            registry: FsmRegistry::new(FsmExecutor::new(Arc::new(definition)), carrier.clone()),
            carrier,
            config,
        })
    }

    /// Starts a reroute. An empty `affected_isls` reroutes unconditionally;
    /// `force` installs new rules even when the computed path is unchanged.
    #[tracing::instrument(skip(self, context, affected_isls), fields(affected = affected_isls.len()))]
    pub async fn handle_request(
        &self,
        key: &str,
        context: CommandContext,
        flow_id: FlowId,
        affected_isls: Vec<AffectedIsl>,
        force: bool,
    ) -> bool {
        let fsm = FlowRerouteFsm::new(
            context,
            self.carrier.clone(),
            flow_id,
            self.config.speaker_retries,
        );
        let context = FlowRerouteContext {
            affected_isls,
            force,
            speaker_response: None,
        };
        self.registry.handle_request(key, fsm, context).await
    }

    pub async fn handle_async_response(&self, key: &str, response: SpeakerResponse) -> bool {
        self.registry.handle_async_response(key, response).await
    }

    pub async fn handle_timeout(&self, key: &str) -> bool {
        self.registry.handle_timeout(key).await
    }

    pub fn registry(&self) -> &FsmRegistry<FlowRerouteFsm> {
        &self.registry
    }
}
