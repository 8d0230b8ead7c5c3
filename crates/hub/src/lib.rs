//! Runnable flow orchestration hub.
//!
//! Wires the flow services to channels: speaker commands leave on one,
//! speaker responses and expired timeouts come back through the dispatcher,
//! and finished operations are reported on the northbound channel. Health
//! and Prometheus metrics are served over HTTP.

pub mod carrier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod loopback;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use flowhs::{FlowOperationResult, SpeakerCommand};
use history::HistoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use network::NetworkStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use carrier::ChannelCarrier;
pub use config::Config;
pub use dispatch::{ActiveOperations, Dispatcher, FlowServices, HubMessage};
pub use error::{HubError, Result};

const INBOUND_CAPACITY: usize = 1024;

/// Creates the Axum application router.
pub fn create_app(services: Arc<FlowServices>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .with_state(services)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Channels the hub produces into.
pub struct HubOutputs {
    pub speaker: mpsc::UnboundedReceiver<SpeakerCommand>,
    pub northbound: mpsc::UnboundedReceiver<FlowOperationResult>,
}

/// A running hub: services plus the dispatcher task.
pub struct Hub {
    services: Arc<FlowServices>,
    inbound: mpsc::Sender<HubMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Builds the services and spawns the dispatcher. Speaker commands are
    /// left on [`HubOutputs::speaker`] for the caller to answer.
    pub fn wire(
        config: &Config,
        store: Arc<dyn NetworkStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<(Self, HubOutputs)> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (speaker_tx, speaker_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (northbound_tx, northbound_rx) = mpsc::unbounded_channel();

        let carrier = ChannelCarrier::new(
            speaker_tx,
            results_tx,
            inbound_tx.clone(),
            history,
            config.operation_timeout,
        );
        let services = Arc::new(FlowServices::new(
            Arc::new(carrier),
            store,
            config.service_config(),
        )?);

        let dispatcher = Dispatcher::new(services.clone());
        let task = tokio::spawn(dispatcher.run(inbound_rx, results_rx, northbound_tx));

        let hub = Self {
            services,
            inbound: inbound_tx,
            tasks: vec![task],
        };
        let outputs = HubOutputs {
            speaker: speaker_rx,
            northbound: northbound_rx,
        };
        Ok((hub, outputs))
    }

    /// Like [`Hub::wire`], with every speaker command acknowledged by the
    /// loopback speaker. Returns the northbound channel.
    pub fn start(
        config: &Config,
        store: Arc<dyn NetworkStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FlowOperationResult>)> {
        let (mut hub, outputs) = Self::wire(config, store, history)?;
        let speaker = tokio::spawn(loopback::run_loopback_speaker(
            outputs.speaker,
            hub.inbound.clone(),
        ));
        hub.tasks.push(speaker);
        Ok((hub, outputs.northbound))
    }

    pub fn services(&self) -> Arc<FlowServices> {
        self.services.clone()
    }

    /// Sender for requests and speaker responses.
    pub fn sender(&self) -> mpsc::Sender<HubMessage> {
        self.inbound.clone()
    }

    /// Stops the dispatcher and the speaker. Live operations are abandoned.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
