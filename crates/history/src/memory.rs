use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::FlowId;
use tokio::sync::RwLock;

use crate::{
    EntryId, HistoryEntry, HistoryError, HistoryQuery, Result,
    store::{EntryStream, HistoryStore},
};

/// In-memory history store.
///
/// Keeps entries in a single vector, so write order is insertion order.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    entries: Arc<RwLock<Vec<HistoryEntry>>>,
}

impl InMemoryHistoryStore {
    /// Creates a new empty in-memory history store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of entries stored.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns every stored entry in write order.
    pub async fn all(&self) -> Vec<HistoryEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<()> {
        let mut store = self.entries.write().await;

        let existing: HashSet<EntryId> = store.iter().map(|e| e.entry_id).collect();
        let mut incoming = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if existing.contains(&entry.entry_id) || !incoming.insert(entry.entry_id) {
                return Err(HistoryError::DuplicateEntry(entry.entry_id));
            }
        }

        metrics::counter!("history_entries_appended").increment(entries.len() as u64);
        store.extend(entries);
        Ok(())
    }

    async fn get_by_task(&self, task_id: &str) -> Result<Vec<HistoryEntry>> {
        self.query(HistoryQuery::for_task(task_id)).await
    }

    async fn get_by_flow(&self, flow_id: &FlowId) -> Result<Vec<HistoryEntry>> {
        self.query(HistoryQuery::for_flow(flow_id.clone())).await
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let store = self.entries.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(store
            .iter()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stream_all(&self) -> Result<EntryStream> {
        let entries = self.entries.read().await.clone();
        Ok(Box::pin(futures_util::stream::iter(entries.into_iter().map(Ok))))
    }
}
