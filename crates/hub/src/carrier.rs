//! Channel-backed carrier connecting the flow services to the rest of the
//! process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowhs::{FlowCarrier, FlowOperationResult, FlowProcessingError, SpeakerCommand};
use history::{HistoryEntry, HistoryStore};
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;

use crate::dispatch::HubMessage;

/// Sends speaker commands and northbound results over channels, writes
/// history to a store and schedules operation timeouts as tokio tasks.
///
/// The outbound channels are unbounded: the dispatcher produces into them
/// while it is the only consumer of the inbound channel. An expired timeout
/// comes back to the dispatcher as [`HubMessage::Timeout`].
#[derive(Clone)]
pub struct ChannelCarrier {
    speaker: mpsc::UnboundedSender<SpeakerCommand>,
    northbound: mpsc::UnboundedSender<FlowOperationResult>,
    inbound: mpsc::Sender<HubMessage>,
    history: Arc<dyn HistoryStore>,
    timeout: Duration,
    timers: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl ChannelCarrier {
    pub fn new(
        speaker: mpsc::UnboundedSender<SpeakerCommand>,
        northbound: mpsc::UnboundedSender<FlowOperationResult>,
        inbound: mpsc::Sender<HubMessage>,
        history: Arc<dyn HistoryStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            speaker,
            northbound,
            inbound,
            history,
            timeout,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of armed timeouts.
    pub async fn pending_timeouts(&self) -> usize {
        self.timers.lock().await.len()
    }
}

#[async_trait]
impl FlowCarrier for ChannelCarrier {
    async fn send_speaker_request(&self, command: SpeakerCommand) -> flowhs::Result<()> {
        let switch_id = command.switch_id;
        self.speaker.send(command).map_err(|_| {
            FlowProcessingError::Transport(format!(
                "speaker channel for switch {switch_id} is closed"
            ))
        })
    }

    async fn send_history_update(&self, entry: HistoryEntry) {
        if let Err(e) = self.history.append(vec![entry]).await {
            tracing::error!(error = %e, "failed to write flow history");
            metrics::counter!("hub_history_write_failures_total").increment(1);
        }
    }

    async fn start_timeout_callback(&self, key: &str) {
        let inbound = self.inbound.clone();
        let timers = self.timers.clone();
        let timeout = self.timeout;
        let owned_key = key.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timers.lock().await.remove(&owned_key);
            if inbound
                .send(HubMessage::Timeout { key: owned_key.clone() })
                .await
                .is_err()
            {
                tracing::warn!(key = %owned_key, "dispatcher gone, timeout dropped");
            }
        });

        let mut timers = self.timers.lock().await;
        if let Some(previous) = timers.insert(key.to_string(), task.abort_handle()) {
            previous.abort();
        }
        tracing::debug!(key, timeout_secs = timeout.as_secs(), "operation timeout armed");
    }

    async fn cancel_timeout_callback(&self, key: &str) {
        if let Some(handle) = self.timers.lock().await.remove(key) {
            handle.abort();
            tracing::debug!(key, "operation timeout cancelled");
        }
    }

    async fn send_northbound_response(&self, result: FlowOperationResult) {
        if self.northbound.send(result).is_err() {
            tracing::warn!("northbound channel closed, result dropped");
        }
    }
}
