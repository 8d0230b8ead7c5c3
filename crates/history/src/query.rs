use chrono::{DateTime, Utc};
use common::FlowId;

/// Builder for constructing history queries.
///
/// Results are always returned in write order.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Filter by flow ID.
    pub flow_id: Option<FlowId>,

    /// Filter by task (correlation) ID.
    pub task_id: Option<String>,

    /// Filter by entries at or after this time.
    pub from_time: Option<DateTime<Utc>>,

    /// Filter by entries at or before this time.
    pub to_time: Option<DateTime<Utc>>,

    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific flow.
    pub fn for_flow(flow_id: FlowId) -> Self {
        Self {
            flow_id: Some(flow_id),
            ..Default::default()
        }
    }

    /// Creates a query for a specific task.
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Default::default()
        }
    }

    pub fn flow_id(mut self, flow_id: FlowId) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn from_time(mut self, time: DateTime<Utc>) -> Self {
        self.from_time = Some(time);
        self
    }

    pub fn to_time(mut self, time: DateTime<Utc>) -> Self {
        self.to_time = Some(time);
        self
    }

    /// Limits the number of entries returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `entry` satisfies every filter except the limit.
    pub fn matches(&self, entry: &crate::HistoryEntry) -> bool {
        if let Some(ref flow_id) = self.flow_id
            && &entry.flow_id != flow_id
        {
            return false;
        }
        if let Some(ref task_id) = self.task_id
            && &entry.task_id != task_id
        {
            return false;
        }
        if let Some(from) = self.from_time
            && entry.time < from
        {
            return false;
        }
        if let Some(to) = self.to_time
            && entry.time > to
        {
            return false;
        }
        true
    }
}
