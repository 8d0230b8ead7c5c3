//! Inbound dispatch: routes requests, speaker responses and expired timeouts
//! to the flow service that owns the operation.

use std::collections::HashMap;
use std::sync::Arc;

use common::FlowId;
use flowhs::{
    AffectedIsl, CommandContext, FlowCarrier, FlowCreateService, FlowDeleteService, FlowOperation,
    FlowOperationResult, FlowRequest, FlowRerouteService, FlowServiceConfig, SpeakerResponse,
};
use network::{AvailableNetworkPathComputer, NetworkStore, PathComputer};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::Result;

/// A message entering the hub.
#[derive(Debug, Clone)]
pub enum HubMessage {
    CreateFlow {
        key: String,
        context: CommandContext,
        request: FlowRequest,
    },
    DeleteFlow {
        key: String,
        context: CommandContext,
        flow_id: FlowId,
    },
    RerouteFlow {
        key: String,
        context: CommandContext,
        flow_id: FlowId,
        affected_isls: Vec<AffectedIsl>,
        force: bool,
    },
    /// A speaker answered one of our commands.
    SpeakerResponse(SpeakerResponse),
    /// The operation timeout for `key` expired.
    Timeout { key: String },
}

impl HubMessage {
    /// The operation key of a request; `None` for responses and timeouts.
    pub fn request_key(&self) -> Option<&str> {
        match self {
            HubMessage::CreateFlow { key, .. }
            | HubMessage::DeleteFlow { key, .. }
            | HubMessage::RerouteFlow { key, .. } => Some(key),
            HubMessage::SpeakerResponse(_) | HubMessage::Timeout { .. } => None,
        }
    }
}

/// The three flow services sharing one carrier and one network store.
pub struct FlowServices {
    pub create: FlowCreateService,
    pub delete: FlowDeleteService,
    pub reroute: FlowRerouteService,
}

/// Live operation counts, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveOperations {
    pub create: usize,
    pub delete: usize,
    pub reroute: usize,
}

impl FlowServices {
    pub fn new(
        carrier: Arc<dyn FlowCarrier>,
        store: Arc<dyn NetworkStore>,
        config: FlowServiceConfig,
    ) -> Result<Self> {
        let pce: Arc<dyn PathComputer> = Arc::new(AvailableNetworkPathComputer::new(store.clone()));
        Ok(Self {
            create: FlowCreateService::new(carrier.clone(), store.clone(), pce.clone(), config)?,
            delete: FlowDeleteService::new(carrier.clone(), store.clone(), config)?,
            reroute: FlowRerouteService::new(carrier, store, pce, config)?,
        })
    }

    pub async fn active_operations(&self) -> ActiveOperations {
        ActiveOperations {
            create: self.create.registry().active_count().await,
            delete: self.delete.registry().active_count().await,
            reroute: self.reroute.registry().active_count().await,
        }
    }
}

/// Where responses for one operation go.
#[derive(Debug, Clone)]
struct Route {
    key: String,
    operation: FlowOperation,
}

/// Single consumer of [`HubMessage`]s.
///
/// Speaker responses carry the correlation id of the request that started
/// the operation; the dispatcher maps it back to the operation key. Routes
/// are dropped once the northbound result for the operation passes through.
pub struct Dispatcher {
    services: Arc<FlowServices>,
    by_correlation: HashMap<String, Route>,
    by_key: HashMap<String, FlowOperation>,
}

impl Dispatcher {
    pub fn new(services: Arc<FlowServices>) -> Self {
        Self {
            services,
            by_correlation: HashMap::new(),
            by_key: HashMap::new(),
        }
    }

    /// Number of operations the dispatcher still routes responses to.
    pub fn routed_operations(&self) -> usize {
        self.by_key.len()
    }

    /// Handles one inbound message. Returns false if it was ignored.
    ///
    /// Keys are unique across operation kinds: a request reusing the key of
    /// any live operation is rejected before it reaches a service.
    pub async fn handle(&mut self, message: HubMessage) -> bool {
        if let Some(key) = message.request_key()
            && let Some(live) = self.by_key.get(key)
        {
            tracing::warn!(
                key,
                operation = %live,
                "key belongs to a live operation, request ignored"
            );
            metrics::counter!("flowhs_duplicate_requests_total", "operation" => live.as_str())
                .increment(1);
            return false;
        }

        match message {
            HubMessage::CreateFlow {
                key,
                context,
                request,
            } => {
                let correlation_id = context.correlation_id.clone();
                let accepted = self
                    .services
                    .create
                    .handle_request(&key, context, request)
                    .await;
                self.track(accepted, key, correlation_id, FlowOperation::Create)
            }
            HubMessage::DeleteFlow {
                key,
                context,
                flow_id,
            } => {
                let correlation_id = context.correlation_id.clone();
                let accepted = self
                    .services
                    .delete
                    .handle_request(&key, context, flow_id)
                    .await;
                self.track(accepted, key, correlation_id, FlowOperation::Delete)
            }
            HubMessage::RerouteFlow {
                key,
                context,
                flow_id,
                affected_isls,
                force,
            } => {
                let correlation_id = context.correlation_id.clone();
                let accepted = self
                    .services
                    .reroute
                    .handle_request(&key, context, flow_id, affected_isls, force)
                    .await;
                self.track(accepted, key, correlation_id, FlowOperation::Reroute)
            }
            HubMessage::SpeakerResponse(response) => {
                let Some(route) = self.by_correlation.get(&response.context.correlation_id) else {
                    tracing::debug!(
                        correlation_id = %response.context.correlation_id,
                        command_id = %response.command_id,
                        "speaker response for no active operation"
                    );
                    metrics::counter!("hub_unroutable_responses_total").increment(1);
                    return false;
                };
                let key = route.key.clone();
                match route.operation {
                    FlowOperation::Create => {
                        self.services.create.handle_async_response(&key, response).await
                    }
                    FlowOperation::Delete => {
                        self.services.delete.handle_async_response(&key, response).await
                    }
                    FlowOperation::Reroute => {
                        self.services.reroute.handle_async_response(&key, response).await
                    }
                }
            }
            HubMessage::Timeout { key } => match self.by_key.get(&key).copied() {
                Some(FlowOperation::Create) => self.services.create.handle_timeout(&key).await,
                Some(FlowOperation::Delete) => self.services.delete.handle_timeout(&key).await,
                Some(FlowOperation::Reroute) => self.services.reroute.handle_timeout(&key).await,
                None => {
                    tracing::debug!(key, "timeout for no active operation");
                    false
                }
            },
        }
    }

    fn track(
        &mut self,
        accepted: bool,
        key: String,
        correlation_id: String,
        operation: FlowOperation,
    ) -> bool {
        if !accepted {
            return false;
        }
        if self.by_correlation.contains_key(&correlation_id) {
            tracing::warn!(
                %correlation_id,
                key,
                "correlation id reused by a live operation; responses go to the newest"
            );
        }
        self.by_key.insert(key.clone(), operation);
        self.by_correlation
            .insert(correlation_id, Route { key, operation });
        true
    }

    /// Forgets the routes of a finished operation.
    pub fn finish(&mut self, result: &FlowOperationResult) {
        self.by_key.remove(&result.key);
        if self
            .by_correlation
            .get(&result.correlation_id)
            .is_some_and(|route| route.key == result.key)
        {
            self.by_correlation.remove(&result.correlation_id);
        }
    }

    /// Runs until the inbound channel closes.
    ///
    /// Results coming back from the services are forwarded to `northbound`
    /// after their routes are dropped.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<HubMessage>,
        mut results: mpsc::UnboundedReceiver<FlowOperationResult>,
        northbound: mpsc::UnboundedSender<FlowOperationResult>,
    ) {
        tracing::info!("dispatcher started");
        loop {
            tokio::select! {
                biased;
                Some(result) = results.recv() => {
                    self.finish(&result);
                    if northbound.send(result).is_err() {
                        tracing::warn!("northbound receiver gone, result dropped");
                    }
                }
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.handle(message).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!(routed = self.routed_operations(), "dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Cookie, PathId, SwitchId};
    use flowhs::{
        FlowSegmentRule, InMemoryCarrier, SegmentKind, SpeakerAction, SpeakerCommand,
    };
    use network::{FlowEndpoint, InMemoryNetworkStore, IslEndpoint, Switch};

    fn dispatcher(carrier: &InMemoryCarrier) -> Dispatcher {
        let services = FlowServices::new(
            Arc::new(carrier.clone()),
            Arc::new(InMemoryNetworkStore::new()),
            FlowServiceConfig::default(),
        )
        .unwrap();
        Dispatcher::new(Arc::new(services))
    }

    fn stray_response() -> SpeakerResponse {
        let command = SpeakerCommand::new(
            CommandContext::new("nobody"),
            SwitchId::new(1),
            SpeakerAction::Install,
            FlowSegmentRule {
                flow_id: FlowId::new("f1"),
                path_id: PathId::new(),
                cookie: Cookie::forward(1),
                kind: SegmentKind::Ingress,
                in_port: 1,
                out_port: 2,
                in_vlan: 0,
                out_vlan: 0,
                transit_vlan: None,
                bandwidth: 0,
                meter_id: None,
            },
        );
        SpeakerResponse::success(&command)
    }

    #[tokio::test]
    async fn ignores_messages_for_unknown_operations() {
        let carrier = InMemoryCarrier::new();
        let mut dispatcher = dispatcher(&carrier);

        assert!(!dispatcher.handle(HubMessage::SpeakerResponse(stray_response())).await);
        assert!(!dispatcher.handle(HubMessage::Timeout { key: "k1".into() }).await);
        assert_eq!(dispatcher.routed_operations(), 0);
    }

    #[tokio::test]
    async fn live_key_is_refused_for_every_operation_kind() {
        let carrier = InMemoryCarrier::new();
        let store = InMemoryNetworkStore::new();
        for n in 1..=2 {
            store.add_switch(Switch::new(SwitchId::new(n))).await;
        }
        store
            .add_bidirectional_isl(
                IslEndpoint::new(SwitchId::new(1), 10),
                IslEndpoint::new(SwitchId::new(2), 20),
                1000,
            )
            .await;
        let services = FlowServices::new(
            Arc::new(carrier.clone()),
            Arc::new(store),
            FlowServiceConfig::default(),
        )
        .unwrap();
        let services = Arc::new(services);
        let mut dispatcher = Dispatcher::new(services.clone());

        let created = dispatcher
            .handle(HubMessage::CreateFlow {
                key: "k1".into(),
                context: CommandContext::new("c1"),
                request: FlowRequest {
                    flow_id: FlowId::new("f1"),
                    source: FlowEndpoint::new(SwitchId::new(1), 1, 100),
                    destination: FlowEndpoint::new(SwitchId::new(2), 2, 200),
                    bandwidth: 100,
                    description: None,
                },
            })
            .await;
        assert!(created);
        assert!(services.create.registry().is_active("k1").await);

        let deleted = dispatcher
            .handle(HubMessage::DeleteFlow {
                key: "k1".into(),
                context: CommandContext::new("c2"),
                flow_id: FlowId::new("absent"),
            })
            .await;
        assert!(!deleted);
        let rerouted = dispatcher
            .handle(HubMessage::RerouteFlow {
                key: "k1".into(),
                context: CommandContext::new("c3"),
                flow_id: FlowId::new("f1"),
                affected_isls: Vec::new(),
                force: false,
            })
            .await;
        assert!(!rerouted);
        assert!(carrier.results().await.is_empty());
        assert_eq!(carrier.started_timeouts().await, vec!["k1"]);

        // The create still owns the key and its timeout.
        assert!(carrier.has_active_timeout("k1").await);
        assert!(dispatcher.handle(HubMessage::Timeout { key: "k1".into() }).await);
    }

    #[tokio::test]
    async fn routes_are_dropped_with_the_result() {
        let carrier = InMemoryCarrier::new();
        let mut dispatcher = dispatcher(&carrier);

        let accepted = dispatcher
            .handle(HubMessage::DeleteFlow {
                key: "k1".into(),
                context: CommandContext::new("c1"),
                flow_id: FlowId::new("absent"),
            })
            .await;
        assert!(accepted);
        assert_eq!(dispatcher.routed_operations(), 1);

        let results = carrier.results().await;
        assert_eq!(results.len(), 1);
        dispatcher.finish(&results[0]);
        assert_eq!(dispatcher.routed_operations(), 0);
    }
}
