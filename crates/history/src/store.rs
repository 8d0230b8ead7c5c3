use std::pin::Pin;

use async_trait::async_trait;
use common::FlowId;
use futures_core::Stream;

use crate::{HistoryEntry, HistoryQuery, Result};

/// A stream of history entries.
pub type EntryStream = Pin<Box<dyn Stream<Item = Result<HistoryEntry>> + Send>>;

/// Core trait for history store implementations.
///
/// A history store is append-only: entries are never updated or deleted,
/// and entries sharing a task id are returned in the order they were
/// written. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends entries to the store.
    ///
    /// Entries are appended atomically - either all succeed or none do.
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<()>;

    /// Retrieves all entries written by one task, in write order.
    async fn get_by_task(&self, task_id: &str) -> Result<Vec<HistoryEntry>>;

    /// Retrieves all entries concerning one flow, in write order.
    async fn get_by_flow(&self, flow_id: &FlowId) -> Result<Vec<HistoryEntry>>;

    /// Retrieves entries matching a query.
    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>>;

    /// Streams all entries in write order.
    async fn stream_all(&self) -> Result<EntryStream>;
}

/// Extension trait providing convenience methods for history stores.
#[async_trait]
pub trait HistoryStoreExt: HistoryStore {
    /// Appends a single entry to the store.
    async fn append_entry(&self, entry: HistoryEntry) -> Result<()> {
        self.append(vec![entry]).await
    }

    /// Returns the most recent entry for a flow, if any.
    async fn last_for_flow(&self, flow_id: &FlowId) -> Result<Option<HistoryEntry>> {
        Ok(self.get_by_flow(flow_id).await?.pop())
    }
}

// Blanket implementation for all HistoryStore implementations
impl<T: HistoryStore + ?Sized> HistoryStoreExt for T {}
