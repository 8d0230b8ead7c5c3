//! End-to-end tests for flow create, delete and reroute.
//!
//! Each test wires the services to an in-memory network and a recording
//! carrier, then plays the speaker by answering the recorded commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{CommandId, FlowId, PathId, SwitchId};
use flowhs::{
    AffectedIsl, CommandContext, FlowCreateService, FlowDeleteService, FlowRequest,
    FlowRerouteService, FlowServiceConfig, InMemoryCarrier, OperationOutcome, SpeakerAction,
    SpeakerCommand, SpeakerErrorCode, SpeakerResponse,
};
use history::HistoryEntry;
use network::{
    AvailableNetworkPathComputer, Flow, FlowEndpoint, FlowStatus, InMemoryNetworkStore, Isl,
    IslEndpoint, IslStatus, NetworkStore, PathComputer, PathComputerError, PathPair, Switch,
};

fn sw(n: u64) -> SwitchId {
    SwitchId::new(n)
}

fn ep(n: u64, port: u32) -> IslEndpoint {
    IslEndpoint::new(sw(n), port)
}

fn request(id: &str, bandwidth: u64) -> FlowRequest {
    FlowRequest {
        flow_id: FlowId::new(id),
        source: FlowEndpoint::new(sw(1), 1, 100),
        destination: FlowEndpoint::new(sw(3), 2, 200),
        bandwidth,
        description: None,
    }
}

fn success(command: &SpeakerCommand) -> Option<SpeakerResponse> {
    Some(SpeakerResponse::success(command))
}

/// Routes a speaker response to whichever service owns the operation.
#[async_trait]
trait Responder {
    async fn respond(&self, key: &str, response: SpeakerResponse) -> bool;
}

#[async_trait]
impl Responder for FlowCreateService {
    async fn respond(&self, key: &str, response: SpeakerResponse) -> bool {
        self.handle_async_response(key, response).await
    }
}

#[async_trait]
impl Responder for FlowDeleteService {
    async fn respond(&self, key: &str, response: SpeakerResponse) -> bool {
        self.handle_async_response(key, response).await
    }
}

#[async_trait]
impl Responder for FlowRerouteService {
    async fn respond(&self, key: &str, response: SpeakerResponse) -> bool {
        self.handle_async_response(key, response).await
    }
}

struct TestHarness {
    store: InMemoryNetworkStore,
    carrier: InMemoryCarrier,
    create: FlowCreateService,
    delete: FlowDeleteService,
    reroute: FlowRerouteService,
    cursor: AtomicUsize,
}

impl TestHarness {
    /// Switches 1-2-3 in a line, plus a costlier detour 1-4-3.
    async fn new() -> Self {
        let store = InMemoryNetworkStore::new();
        for n in 1..=4 {
            store.add_switch(Switch::new(sw(n))).await;
        }
        store.add_bidirectional_isl(ep(1, 10), ep(2, 20), 1000).await;
        store.add_bidirectional_isl(ep(2, 21), ep(3, 30), 1000).await;
        for (a, b) in [(ep(1, 11), ep(4, 40)), (ep(4, 41), ep(3, 31))] {
            store.add_isl(Isl::new(a, b, 1000).with_cost(5)).await;
            store.add_isl(Isl::new(b, a, 1000).with_cost(5)).await;
        }

        let carrier = InMemoryCarrier::new();
        let shared: Arc<dyn NetworkStore> = Arc::new(store.clone());
        let pce = Arc::new(AvailableNetworkPathComputer::new(shared.clone()));
        let config = FlowServiceConfig::default();

        let create = FlowCreateService::new(
            Arc::new(carrier.clone()),
            shared.clone(),
            pce.clone(),
            config,
        )
        .unwrap();
        let delete =
            FlowDeleteService::new(Arc::new(carrier.clone()), shared.clone(), config).unwrap();
        let reroute =
            FlowRerouteService::new(Arc::new(carrier.clone()), shared, pce, config).unwrap();

        Self {
            store,
            carrier,
            create,
            delete,
            reroute,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Answers every command sent since the last call with `reply` until
    /// no new command shows up. A `None` reply drops the command.
    async fn answer_with<R, F>(&self, service: &R, key: &str, mut reply: F) -> Vec<SpeakerCommand>
    where
        R: Responder,
        F: FnMut(&SpeakerCommand) -> Option<SpeakerResponse>,
    {
        let mut answered = Vec::new();
        loop {
            let start = self.cursor.load(Ordering::SeqCst);
            let commands = self.carrier.commands_since(start).await;
            if commands.is_empty() {
                return answered;
            }
            self.cursor.store(start + commands.len(), Ordering::SeqCst);

            for command in commands {
                if let Some(response) = reply(&command) {
                    service.respond(key, response).await;
                }
                answered.push(command);
            }
        }
    }

    async fn answer<R: Responder>(&self, service: &R, key: &str) -> Vec<SpeakerCommand> {
        self.answer_with(service, key, success).await
    }

    /// Creates a flow from switch 1 to switch 3 and checks it came up.
    async fn create_flow(&self, id: &str, bandwidth: u64) -> FlowId {
        let key = format!("create-{id}");
        let accepted = self
            .create
            .handle_request(
                &key,
                CommandContext::new(format!("corr-create-{id}")),
                request(id, bandwidth),
            )
            .await;
        assert!(accepted);
        self.answer(&self.create, &key).await;

        let flow_id = FlowId::new(id);
        let flow = self.store.flow(&flow_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Up);
        flow_id
    }

    async fn history_of(&self, task_id: &str) -> Vec<HistoryEntry> {
        self.carrier
            .history()
            .await
            .into_iter()
            .filter(|entry| entry.task_id == task_id)
            .collect()
    }

    async fn outcome_of(&self, key: &str) -> OperationOutcome {
        let results: Vec<_> = self
            .carrier
            .results()
            .await
            .into_iter()
            .filter(|result| result.key == key)
            .collect();
        assert_eq!(results.len(), 1, "expected exactly one result for {key}");
        results[0].outcome.clone()
    }

    async fn fail_link_1_2(&self) {
        for (a, b) in [(ep(1, 10), ep(2, 20)), (ep(2, 20), ep(1, 10))] {
            self.store
                .add_isl(Isl::new(a, b, 1000).with_status(IslStatus::Inactive))
                .await;
        }
    }
}

fn failure_reason(outcome: OperationOutcome) -> String {
    match outcome {
        OperationOutcome::Failed { reason } => reason,
        OperationOutcome::Success => panic!("operation unexpectedly succeeded"),
    }
}

mod create {
    use super::*;

    #[tokio::test]
    async fn installs_and_validates_every_rule() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;

        let commands = h.carrier.commands().await;
        assert_eq!(commands.len(), 12);
        assert!(commands[..6].iter().all(|c| c.action == SpeakerAction::Install));
        assert!(commands[6..].iter().all(|c| c.action == SpeakerAction::Verify));

        let flow = h.store.flow(&flow_id).await.unwrap();
        assert!(flow.forward_path_id.is_some() && flow.reverse_path_id.is_some());
        assert_eq!(h.store.paths_for_flow(&flow_id).await.len(), 2);

        let isl = h.store.isl(ep(1, 10), ep(2, 20)).await.unwrap();
        assert_eq!(isl.available_bandwidth, 900);

        assert_eq!(h.outcome_of("create-f1").await, OperationOutcome::Success);
        let history = h.history_of("corr-create-f1").await;
        assert_eq!(history.first().unwrap().action, "Flow was validated");
        assert_eq!(history.last().unwrap().action, "Flow was created");
        assert!(!h.create.registry().is_active("create-f1").await);
        assert_eq!(h.carrier.cancelled_timeouts().await, vec!["create-f1"]);
    }

    #[tokio::test]
    async fn rejects_flow_that_already_exists() {
        let h = TestHarness::new().await;
        h.create_flow("f1", 100).await;
        let sent = h.carrier.command_count().await;

        h.create
            .handle_request("again", CommandContext::new("corr-again"), request("f1", 100))
            .await;

        assert_eq!(h.carrier.command_count().await, sent);
        assert_eq!(
            failure_reason(h.outcome_of("again").await),
            "Flow f1 already exists"
        );
        let flow = h.store.flow(&FlowId::new("f1")).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Up);
    }

    #[tokio::test]
    async fn rejects_zero_bandwidth() {
        let h = TestHarness::new().await;

        h.create
            .handle_request("k", CommandContext::new("c"), request("f1", 0))
            .await;

        assert!(failure_reason(h.outcome_of("k").await).contains("bandwidth"));
        assert!(h.store.flow(&FlowId::new("f1")).await.is_none());
    }

    #[tokio::test]
    async fn missing_rule_reverts_the_creation() {
        let h = TestHarness::new().await;
        h.create
            .handle_request("k", CommandContext::new("c"), request("f1", 100))
            .await;

        let mut corrupted = false;
        h.answer_with(&h.create, "k", |command| {
            if command.action == SpeakerAction::Verify && !corrupted {
                corrupted = true;
                let mut rule = command.rule.clone();
                rule.out_port += 1;
                return Some(SpeakerResponse::verified(command, rule));
            }
            success(command)
        })
        .await;

        let removes = h
            .carrier
            .commands()
            .await
            .into_iter()
            .filter(|c| c.action == SpeakerAction::Remove)
            .count();
        assert_eq!(removes, 6);

        let flow = h.store.flow(&FlowId::new("f1")).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Down);
        assert_eq!(flow.forward_path_id, None);
        assert_eq!(h.store.path_count().await, 0);
        assert_eq!(h.store.allocated_resource_count().await, 0);
        let isl = h.store.isl(ep(1, 10), ep(2, 20)).await.unwrap();
        assert_eq!(isl.available_bandwidth, 1000);

        assert!(failure_reason(h.outcome_of("k").await).starts_with("Missing rules of flow f1"));
    }

    #[tokio::test]
    async fn timeout_while_installing_removes_what_was_sent() {
        let h = TestHarness::new().await;
        h.create
            .handle_request("k", CommandContext::new("c"), request("f1", 100))
            .await;
        let installs = h.carrier.commands().await;

        assert!(h.create.handle_timeout("k").await);
        h.answer_with(&h.create, "k", |command| match command.action {
            SpeakerAction::Remove => success(command),
            _ => None,
        })
        .await;

        assert_eq!(failure_reason(h.outcome_of("k").await), "Operation timed out");
        let flow = h.store.flow(&FlowId::new("f1")).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Down);

        // Late events find nothing to act on.
        assert!(!h.create.handle_timeout("k").await);
        assert!(
            !h.create
                .handle_async_response("k", SpeakerResponse::success(&installs[0]))
                .await
        );
        assert_eq!(h.carrier.results().await.len(), 1);
    }

    /// Holds path computation until `gate` has as many waiters as it was
    /// built for, so concurrent creates both pass validation first.
    struct GatedPathComputer {
        inner: AvailableNetworkPathComputer,
        gate: tokio::sync::Barrier,
    }

    #[async_trait]
    impl PathComputer for GatedPathComputer {
        async fn get_path(
            &self,
            flow: &Flow,
            reuse_paths: &[PathId],
        ) -> Result<PathPair, PathComputerError> {
            self.gate.wait().await;
            self.inner.get_path(flow, reuse_paths).await
        }
    }

    #[tokio::test]
    async fn losing_concurrent_create_leaves_the_winner_alone() {
        let h = TestHarness::new().await;
        let shared: Arc<dyn NetworkStore> = Arc::new(h.store.clone());
        let pce = Arc::new(GatedPathComputer {
            inner: AvailableNetworkPathComputer::new(shared.clone()),
            gate: tokio::sync::Barrier::new(2),
        });
        let create = FlowCreateService::new(
            Arc::new(h.carrier.clone()),
            shared,
            pce,
            FlowServiceConfig::default(),
        )
        .unwrap();

        let (first, second) = tokio::join!(
            create.handle_request("k1", CommandContext::new("c1"), request("f1", 100)),
            create.handle_request("k2", CommandContext::new("c2"), request("f1", 100)),
        );
        assert!(first && second);

        // Exactly one of them lost the race and has already finished.
        let results = h.carrier.results().await;
        assert_eq!(results.len(), 1);
        let loser = results[0].key.clone();
        let winner = if loser == "k1" { "k2" } else { "k1" };
        assert!(failure_reason(results[0].outcome.clone()).contains("already exists"));

        let flow = h.store.flow(&FlowId::new("f1")).await.unwrap();
        assert!(flow.forward_path_id.is_some());
        assert!(flow.reverse_path_id.is_some());
        assert_eq!(h.store.path_count().await, 2);

        h.answer(&create, winner).await;

        assert_eq!(h.outcome_of(winner).await, OperationOutcome::Success);
        let flow = h.store.flow(&FlowId::new("f1")).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Up);
        let paths = h.store.paths_for_flow(&FlowId::new("f1")).await;
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().any(|p| Some(p.path_id) == flow.forward_path_id));
        assert!(paths.iter().any(|p| Some(p.path_id) == flow.reverse_path_id));
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn removes_rules_paths_and_recomputes_shared_links() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        h.create_flow("f2", 200).await;
        let flow = h.store.flow(&flow_id).await.unwrap();
        let forward = flow.forward_path_id.unwrap();
        let reverse = flow.reverse_path_id.unwrap();

        // A stale value the recompute must overwrite.
        h.store
            .set_available_bandwidth(ep(1, 10), ep(2, 20), 12345)
            .await;

        h.delete
            .handle_request("del", CommandContext::new("corr-del"), flow_id.clone())
            .await;
        let removes = h.answer(&h.delete, "del").await;

        assert_eq!(removes.len(), 6);
        assert!(removes.iter().all(|c| c.action == SpeakerAction::Remove));
        assert!(h.store.flow(&flow_id).await.is_none());
        assert!(h.store.paths_for_flow(&flow_id).await.is_empty());

        for (src, dst) in [
            (ep(1, 10), ep(2, 20)),
            (ep(2, 20), ep(1, 10)),
            (ep(2, 21), ep(3, 30)),
        ] {
            let isl = h.store.isl(src, dst).await.unwrap();
            assert_eq!(isl.available_bandwidth, 800, "link {src} -> {dst}");
        }

        let removed: Vec<_> = h
            .history_of("corr-del")
            .await
            .into_iter()
            .filter(|entry| entry.action == "Flow path was removed")
            .map(|entry| entry.description.unwrap_or_default())
            .collect();
        assert_eq!(
            removed,
            vec![
                format!("Flow path {forward} was removed"),
                format!("Flow path {reverse} was removed"),
            ]
        );

        assert_eq!(h.outcome_of("del").await, OperationOutcome::Success);
        assert!(!h.delete.registry().is_active("del").await);
    }

    #[tokio::test]
    async fn retries_recoverable_errors() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        h.delete
            .handle_request("del", CommandContext::new("corr-del"), flow_id.clone())
            .await;

        let mut flaky: Option<CommandId> = None;
        let mut errors = 0;
        h.answer_with(&h.delete, "del", |command| {
            let target = *flaky.get_or_insert(command.command_id);
            if command.command_id == target && errors < 3 {
                errors += 1;
                return Some(SpeakerResponse::error(
                    command,
                    SpeakerErrorCode::Timeout,
                    "switch did not answer",
                ));
            }
            success(command)
        })
        .await;

        assert_eq!(h.outcome_of("del").await, OperationOutcome::Success);
        assert!(h.store.flow(&flow_id).await.is_none());

        let retries: Vec<_> = h
            .history_of("corr-del")
            .await
            .into_iter()
            .filter(|entry| entry.action == "Failed to remove rule")
            .map(|entry| entry.description.unwrap_or_default())
            .collect();
        assert_eq!(retries.len(), 3);
        assert!(retries[0].ends_with("Retrying (attempt 1)"));
        assert!(retries[2].ends_with("Retrying (attempt 3)"));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_delete() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        h.delete
            .handle_request("del", CommandContext::new("corr-del"), flow_id.clone())
            .await;

        let mut broken: Option<CommandId> = None;
        let mut attempts: HashMap<CommandId, u32> = HashMap::new();
        h.answer_with(&h.delete, "del", |command| {
            let target = *broken.get_or_insert(command.command_id);
            *attempts.entry(command.command_id).or_default() += 1;
            if command.command_id == target {
                return Some(SpeakerResponse::error(
                    command,
                    SpeakerErrorCode::SwitchUnavailable,
                    "switch is gone",
                ));
            }
            success(command)
        })
        .await;

        let target = broken.unwrap();
        assert_eq!(attempts[&target], 4);

        let reason = failure_reason(h.outcome_of("del").await);
        assert!(reason.starts_with("Failed to remove rules of flow f1"));

        let flow = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Down);
        assert_eq!(h.store.paths_for_flow(&flow_id).await.len(), 2);
        let actions: Vec<_> = h
            .history_of("corr-del")
            .await
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions.last().map(String::as_str), Some("Flow deletion failed"));
    }

    #[tokio::test]
    async fn duplicate_key_leaves_running_operation_alone() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        let before = h.carrier.command_count().await;

        assert!(
            h.delete
                .handle_request("del", CommandContext::new("c1"), flow_id.clone())
                .await
        );
        assert!(
            !h.delete
                .handle_request("del", CommandContext::new("c2"), flow_id.clone())
                .await
        );
        assert_eq!(h.carrier.command_count().await, before + 6);
        assert_eq!(h.delete.registry().active_count().await, 1);

        h.answer(&h.delete, "del").await;
        assert_eq!(h.outcome_of("del").await, OperationOutcome::Success);
    }

    #[tokio::test]
    async fn duplicate_responses_complete_only_once() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        let skip = h.carrier.command_count().await;
        h.delete
            .handle_request("del", CommandContext::new("c"), flow_id)
            .await;

        for command in h.carrier.commands_since(skip).await {
            let response = SpeakerResponse::success(&command);
            h.delete.handle_async_response("del", response.clone()).await;
            h.delete.handle_async_response("del", response).await;
        }

        assert_eq!(h.outcome_of("del").await, OperationOutcome::Success);
        assert_eq!(h.carrier.results().await.len(), 2);
    }

    #[tokio::test]
    async fn flow_with_operation_in_flight_is_refused() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;

        h.delete
            .handle_request("first", CommandContext::new("c1"), flow_id.clone())
            .await;
        h.delete
            .handle_request("second", CommandContext::new("c2"), flow_id.clone())
            .await;

        assert_eq!(
            failure_reason(h.outcome_of("second").await),
            "Flow f1 is InProgress"
        );
        // The refused request must not touch the status set by the first.
        let flow = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::InProgress);

        h.answer(&h.delete, "first").await;
        assert_eq!(h.outcome_of("first").await, OperationOutcome::Success);
    }
}

mod reroute {
    use super::*;

    fn affected_1_2() -> Vec<AffectedIsl> {
        vec![AffectedIsl::new(ep(1, 10), ep(2, 20))]
    }

    #[tokio::test]
    async fn moves_flow_off_a_failed_link() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        let old = h.store.flow(&flow_id).await.unwrap();
        h.fail_link_1_2().await;

        h.reroute
            .handle_request(
                "rr",
                CommandContext::new("corr-rr"),
                flow_id.clone(),
                affected_1_2(),
                false,
            )
            .await;
        let commands = h.answer(&h.reroute, "rr").await;

        let actions: Vec<_> = commands.iter().map(|c| c.action).collect();
        assert_eq!(commands.len(), 18);
        let installs = |range: std::ops::Range<usize>, ingress: bool| {
            commands[range].iter().all(|c| {
                c.action == SpeakerAction::Install && c.rule.kind.is_ingress() == ingress
            })
        };
        assert!(installs(0..4, false));
        assert!(actions[4..8].iter().all(|a| *a == SpeakerAction::Verify));
        assert!(installs(8..10, true));
        assert!(actions[10..12].iter().all(|a| *a == SpeakerAction::Verify));
        assert!(actions[12..].iter().all(|a| *a == SpeakerAction::Remove));

        let flow = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Up);
        assert_ne!(flow.forward_path_id, old.forward_path_id);
        let forward = h.store.path(flow.forward_path_id.unwrap()).await.unwrap();
        assert!(forward.switches().contains(&sw(4)));
        assert_eq!(h.store.path_count().await, 2);
        assert!(h.store.path(old.forward_path_id.unwrap()).await.is_none());

        let detour = h.store.isl(ep(1, 11), ep(4, 40)).await.unwrap();
        assert_eq!(detour.available_bandwidth, 900);

        assert_eq!(h.outcome_of("rr").await, OperationOutcome::Success);
        let history: Vec<_> = h
            .history_of("corr-rr")
            .await
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert!(history.contains(&"Flow paths were swapped".to_string()));
        assert_eq!(history.last().map(String::as_str), Some("Flow was rerouted"));
    }

    #[tokio::test]
    async fn skipped_when_flow_avoids_the_affected_links() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        let before = h.store.flow(&flow_id).await.unwrap();
        let sent = h.carrier.command_count().await;

        h.reroute
            .handle_request(
                "rr",
                CommandContext::new("corr-rr"),
                flow_id.clone(),
                vec![AffectedIsl::new(ep(1, 11), ep(4, 40))],
                false,
            )
            .await;

        assert_eq!(h.carrier.command_count().await, sent);
        assert_eq!(h.outcome_of("rr").await, OperationOutcome::Success);
        let after = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(after.status, FlowStatus::Up);
        assert_eq!(after.forward_path_id, before.forward_path_id);
        let history: Vec<_> = h
            .history_of("corr-rr")
            .await
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert!(history.contains(&"Reroute is skipped".to_string()));
    }

    #[tokio::test]
    async fn skipped_when_the_best_path_is_unchanged() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        let before = h.store.flow(&flow_id).await.unwrap();
        let resources = h.store.allocated_resource_count().await;
        let sent = h.carrier.command_count().await;

        h.reroute
            .handle_request("rr", CommandContext::new("c"), flow_id.clone(), Vec::new(), false)
            .await;

        assert_eq!(h.carrier.command_count().await, sent);
        assert_eq!(h.outcome_of("rr").await, OperationOutcome::Success);
        let after = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(after.forward_path_id, before.forward_path_id);
        assert_eq!(after.status, FlowStatus::Up);
        assert_eq!(h.store.allocated_resource_count().await, resources);
    }

    #[tokio::test]
    async fn forced_reroute_replaces_paths_on_the_same_route() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        let before = h.store.flow(&flow_id).await.unwrap();
        let resources = h.store.allocated_resource_count().await;

        h.reroute
            .handle_request("rr", CommandContext::new("c"), flow_id.clone(), Vec::new(), true)
            .await;
        let commands = h.answer(&h.reroute, "rr").await;

        assert_eq!(commands.len(), 18);
        assert_eq!(h.outcome_of("rr").await, OperationOutcome::Success);
        let after = h.store.flow(&flow_id).await.unwrap();
        assert_ne!(after.forward_path_id, before.forward_path_id);
        assert_eq!(h.store.path_count().await, 2);
        assert_eq!(h.store.allocated_resource_count().await, resources);
        let isl = h.store.isl(ep(1, 10), ep(2, 20)).await.unwrap();
        assert_eq!(isl.available_bandwidth, 900);
    }

    #[tokio::test]
    async fn missing_ingress_rule_keeps_the_old_paths() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        let before = h.store.flow(&flow_id).await.unwrap();
        let resources = h.store.allocated_resource_count().await;
        h.fail_link_1_2().await;

        h.reroute
            .handle_request(
                "rr",
                CommandContext::new("c"),
                flow_id.clone(),
                affected_1_2(),
                false,
            )
            .await;
        let commands = h
            .answer_with(&h.reroute, "rr", |command| {
                if command.action == SpeakerAction::Verify && command.rule.kind.is_ingress() {
                    let mut rule = command.rule.clone();
                    rule.in_port += 1;
                    return Some(SpeakerResponse::verified(command, rule));
                }
                success(command)
            })
            .await;

        let reverted: Vec<_> = commands
            .iter()
            .filter(|c| c.action == SpeakerAction::Remove)
            .collect();
        assert_eq!(reverted.len(), 6);

        let reason = failure_reason(h.outcome_of("rr").await);
        assert!(reason.starts_with("Missing rules of flow f1"));

        let after = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(after.status, FlowStatus::Up);
        assert_eq!(after.forward_path_id, before.forward_path_id);
        assert_eq!(after.reverse_path_id, before.reverse_path_id);
        assert_eq!(h.store.path_count().await, 2);
        assert_eq!(h.store.allocated_resource_count().await, resources);
        let detour = h.store.isl(ep(1, 11), ep(4, 40)).await.unwrap();
        assert_eq!(detour.available_bandwidth, 1000);
    }

    #[tokio::test]
    async fn timeout_after_swap_keeps_the_new_paths() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        h.fail_link_1_2().await;

        h.reroute
            .handle_request(
                "rr",
                CommandContext::new("corr-rr"),
                flow_id.clone(),
                affected_1_2(),
                false,
            )
            .await;
        h.answer_with(&h.reroute, "rr", |command| match command.action {
            SpeakerAction::Remove => None,
            _ => success(command),
        })
        .await;
        assert!(h.reroute.registry().is_active("rr").await);

        assert!(h.reroute.handle_timeout("rr").await);

        assert_eq!(failure_reason(h.outcome_of("rr").await), "Operation timed out");
        let flow = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::Up);
        let forward = h.store.path(flow.forward_path_id.unwrap()).await.unwrap();
        assert!(forward.switches().contains(&sw(4)));

        let last = h.history_of("corr-rr").await.pop().unwrap();
        assert_eq!(last.action, "Failed to complete the reroute");
        assert!(last.description.unwrap_or_default().contains("Old rules left"));
    }

    #[tokio::test]
    async fn busy_flow_is_left_untouched() {
        let h = TestHarness::new().await;
        let flow_id = h.create_flow("f1", 100).await;
        h.delete
            .handle_request("del", CommandContext::new("c1"), flow_id.clone())
            .await;

        h.reroute
            .handle_request("rr", CommandContext::new("c2"), flow_id.clone(), Vec::new(), true)
            .await;

        assert_eq!(
            failure_reason(h.outcome_of("rr").await),
            "Flow f1 is InProgress"
        );
        let flow = h.store.flow(&flow_id).await.unwrap();
        assert_eq!(flow.status, FlowStatus::InProgress);
        assert_eq!(h.store.path_count().await, 2);
    }
}
