//! Integration tests for the hub process.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{FlowId, SwitchId};
use flowhs::{
    CommandContext, FlowOperation, FlowOperationResult, FlowRequest, OperationOutcome,
    SpeakerAction, SpeakerResponse,
};
use history::{HistoryStore, InMemoryHistoryStore};
use hub::{Config, FlowServices, Hub, HubMessage, create_app};
use metrics_exporter_prometheus::PrometheusHandle;
use network::{FlowEndpoint, FlowStatus, InMemoryNetworkStore, IslEndpoint, NetworkStore, Switch};
use tokio::sync::mpsc;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn line_network() -> InMemoryNetworkStore {
    let store = InMemoryNetworkStore::new();
    for n in 1..=3 {
        store.add_switch(Switch::new(SwitchId::new(n))).await;
    }
    store
        .add_bidirectional_isl(
            IslEndpoint::new(SwitchId::new(1), 10),
            IslEndpoint::new(SwitchId::new(2), 20),
            1000,
        )
        .await;
    store
        .add_bidirectional_isl(
            IslEndpoint::new(SwitchId::new(2), 21),
            IslEndpoint::new(SwitchId::new(3), 30),
            1000,
        )
        .await;
    store
}

fn create_message(key: &str, flow_id: &str) -> HubMessage {
    HubMessage::CreateFlow {
        key: key.to_string(),
        context: CommandContext::new(format!("corr-{key}")),
        request: FlowRequest {
            flow_id: FlowId::new(flow_id),
            source: FlowEndpoint::new(SwitchId::new(1), 1, 100),
            destination: FlowEndpoint::new(SwitchId::new(3), 2, 200),
            bandwidth: 100,
            description: None,
        },
    }
}

async fn next_result(
    northbound: &mut mpsc::UnboundedReceiver<FlowOperationResult>,
) -> FlowOperationResult {
    tokio::time::timeout(Duration::from_secs(60), northbound.recv())
        .await
        .expect("no operation result")
        .expect("northbound channel closed")
}

fn setup_app() -> axum::Router {
    let store: Arc<dyn NetworkStore> = Arc::new(InMemoryNetworkStore::new());
    let carrier = Arc::new(flowhs::InMemoryCarrier::new());
    let services = FlowServices::new(carrier, store, Config::default().service_config()).unwrap();
    create_app(Arc::new(services), get_metrics_handle())
}

#[tokio::test]
async fn test_health_check() {
    let app = setup_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_operations"]["create"], 0);
    assert_eq!(json["active_operations"]["reroute"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_create_then_delete_with_loopback_speaker() {
    let store = line_network().await;
    let history = Arc::new(InMemoryHistoryStore::new());
    let (hub, mut northbound) = Hub::start(
        &Config::default(),
        Arc::new(store.clone()),
        history.clone(),
    )
    .unwrap();
    let sender = hub.sender();

    sender.send(create_message("k1", "f1")).await.unwrap();
    let created = next_result(&mut northbound).await;
    assert_eq!(created.key, "k1");
    assert_eq!(created.operation, FlowOperation::Create);
    assert_eq!(created.outcome, OperationOutcome::Success);

    let flow = store.flow(&FlowId::new("f1")).await.unwrap();
    assert_eq!(flow.status, FlowStatus::Up);
    assert!(!history.get_by_task("corr-k1").await.unwrap().is_empty());

    sender
        .send(HubMessage::DeleteFlow {
            key: "k2".to_string(),
            context: CommandContext::new("corr-k2"),
            flow_id: FlowId::new("f1"),
        })
        .await
        .unwrap();
    let deleted = next_result(&mut northbound).await;
    assert_eq!(deleted.operation, FlowOperation::Delete);
    assert_eq!(deleted.outcome, OperationOutcome::Success);
    assert!(store.flow(&FlowId::new("f1")).await.is_none());
    assert_eq!(store.path_count().await, 0);

    let active = hub.services().active_operations().await;
    assert_eq!(active, hub::ActiveOperations::default());
    hub.shutdown();
}

#[tokio::test]
async fn test_rejected_request_is_reported_once() {
    let store = line_network().await;
    let (hub, mut northbound) = Hub::start(
        &Config::default(),
        Arc::new(store),
        Arc::new(InMemoryHistoryStore::new()),
    )
    .unwrap();

    hub.sender()
        .send(HubMessage::DeleteFlow {
            key: "k1".to_string(),
            context: CommandContext::new("corr-k1"),
            flow_id: FlowId::new("absent"),
        })
        .await
        .unwrap();

    let result = next_result(&mut northbound).await;
    assert_eq!(
        result.outcome,
        OperationOutcome::Failed {
            reason: "Flow absent not found".to_string()
        }
    );
    assert!(northbound.try_recv().is_err());
    hub.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_commands_time_out() {
    let store = line_network().await;
    let config = Config {
        operation_timeout: Duration::from_secs(5),
        ..Config::default()
    };
    let (hub, mut outputs) = Hub::wire(
        &config,
        Arc::new(store.clone()),
        Arc::new(InMemoryHistoryStore::new()),
    )
    .unwrap();

    // Plays a speaker that only ever acknowledges removals.
    let sender = hub.sender();
    let mut speaker = outputs.speaker;
    tokio::spawn(async move {
        while let Some(command) = speaker.recv().await {
            if command.action == SpeakerAction::Remove {
                let response = SpeakerResponse::success(&command);
                if sender
                    .send(HubMessage::SpeakerResponse(response))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    });

    hub.sender().send(create_message("k1", "f1")).await.unwrap();

    let result = next_result(&mut outputs.northbound).await;
    assert_eq!(result.operation, FlowOperation::Create);
    assert_eq!(
        result.outcome,
        OperationOutcome::Failed {
            reason: "Operation timed out".to_string()
        }
    );
    assert_eq!(store.path_count().await, 0);
    hub.shutdown();
}
