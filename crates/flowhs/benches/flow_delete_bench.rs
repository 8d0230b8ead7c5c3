use std::sync::Arc;

use common::{FlowId, SwitchId};
use criterion::{Criterion, criterion_group, criterion_main};
use flowhs::{
    CommandContext, FlowCreateService, FlowDeleteService, FlowRequest, FlowServiceConfig,
    InMemoryCarrier, SpeakerResponse,
};
use network::{
    AvailableNetworkPathComputer, FlowEndpoint, InMemoryNetworkStore, IslEndpoint, NetworkStore,
    Switch,
};

fn sw(n: u64) -> SwitchId {
    SwitchId::new(n)
}

/// A line of `length` switches.
async fn line_network(length: u64) -> InMemoryNetworkStore {
    let store = InMemoryNetworkStore::new();
    for n in 1..=length {
        store.add_switch(Switch::new(sw(n))).await;
    }
    for n in 1..length {
        store
            .add_bidirectional_isl(
                IslEndpoint::new(sw(n), 10),
                IslEndpoint::new(sw(n + 1), 20),
                10_000,
            )
            .await;
    }
    store
}

/// Answers every command the carrier recorded after `skip` until it goes
/// quiet.
async fn answer_all<F, Fut>(carrier: &InMemoryCarrier, mut skip: usize, respond: F)
where
    F: Fn(SpeakerResponse) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    loop {
        let commands = carrier.commands_since(skip).await;
        if commands.is_empty() {
            return;
        }
        skip += commands.len();
        for command in &commands {
            respond(SpeakerResponse::success(command)).await;
        }
    }
}

async fn create_and_delete(length: u64) {
    let store = line_network(length).await;
    let carrier = InMemoryCarrier::new();
    let shared: Arc<dyn NetworkStore> = Arc::new(store);
    let pce = Arc::new(AvailableNetworkPathComputer::new(shared.clone()));
    let config = FlowServiceConfig::default();
    let create =
        FlowCreateService::new(Arc::new(carrier.clone()), shared.clone(), pce, config).unwrap();
    let delete = FlowDeleteService::new(Arc::new(carrier.clone()), shared, config).unwrap();

    let request = FlowRequest {
        flow_id: FlowId::new("bench"),
        source: FlowEndpoint::new(sw(1), 1, 100),
        destination: FlowEndpoint::new(sw(length), 2, 200),
        bandwidth: 100,
        description: None,
    };
    create
        .handle_request("create", CommandContext::new("c1"), request)
        .await;
    answer_all(&carrier, 0, |r| create.handle_async_response("create", r)).await;

    let skip = carrier.command_count().await;
    delete
        .handle_request("delete", CommandContext::new("c2"), FlowId::new("bench"))
        .await;
    answer_all(&carrier, skip, |r| delete.handle_async_response("delete", r)).await;
}

fn bench_delete_three_switch_flow(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("flowhs/create_and_delete_3_switches", |b| {
        b.iter(|| rt.block_on(create_and_delete(3)));
    });
}

fn bench_delete_long_flow(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("flowhs/create_and_delete_16_switches", |b| {
        b.iter(|| rt.block_on(create_and_delete(16)));
    });
}

criterion_group!(
    benches,
    bench_delete_three_switch_flow,
    bench_delete_long_flow
);
criterion_main!(benches);
