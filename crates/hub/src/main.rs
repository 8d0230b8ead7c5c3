//! Hub entry point.

use std::sync::Arc;

use history::{HistoryError, HistoryStore, InMemoryHistoryStore, PostgresHistoryStore};
use hub::{Config, Hub, HubError};
use network::{InMemoryNetworkStore, NetworkStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn history_store(config: &Config) -> hub::Result<Arc<dyn HistoryStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            let store = PostgresHistoryStore::new(pool);
            store
                .run_migrations()
                .await
                .map_err(HistoryError::from)?;
            tracing::info!("using Postgres flow history");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("using in-memory flow history");
            Ok(Arc::new(InMemoryHistoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> hub::Result<()> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| HubError::Metrics(e.to_string()))?;

    // 3. Stores and services
    let history = history_store(&config).await?;
    let store: Arc<dyn NetworkStore> = Arc::new(InMemoryNetworkStore::new());
    let (hub, mut northbound) = Hub::start(&config, store, history)?;

    tokio::spawn(async move {
        while let Some(result) = northbound.recv().await {
            tracing::info!(
                key = %result.key,
                flow_id = %result.flow_id,
                operation = %result.operation,
                success = result.outcome.is_success(),
                "operation finished"
            );
        }
    });

    // 4. Serve health and metrics
    let app = hub::create_app(hub.services(), metrics_handle);
    let addr = config.addr();
    tracing::info!(
        %addr,
        timeout_secs = config.operation_timeout.as_secs(),
        speaker_retries = config.speaker_retries,
        "starting flow hub"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.shutdown();
    tracing::info!("hub shut down gracefully");
    Ok(())
}
