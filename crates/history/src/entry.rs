use chrono::{DateTime, Utc};
use common::FlowId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{HistoryError, Result};

/// Unique identifier for a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entry ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single record in a flow's audit trail.
///
/// Entries are written once and never modified. `task_id` is the
/// correlation id of the operation that produced the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unique identifier for this entry.
    pub entry_id: EntryId,

    /// Correlation id of the operation that wrote the entry.
    pub task_id: String,

    /// The flow this entry concerns.
    pub flow_id: FlowId,

    /// Short human-readable label, e.g. "Flow path was removed".
    pub action: String,

    /// Free-text details.
    pub description: Option<String>,

    /// When the entry was recorded.
    pub time: DateTime<Utc>,
}

impl HistoryEntry {
    /// Creates a new history entry builder.
    pub fn builder() -> HistoryEntryBuilder {
        HistoryEntryBuilder::default()
    }

    /// Creates an entry stamped with the current time.
    pub fn new(
        task_id: impl Into<String>,
        flow_id: FlowId,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: EntryId::new(),
            task_id: task_id.into(),
            flow_id,
            action: action.into(),
            description: Some(description.into()),
            time: Utc::now(),
        }
    }
}

/// Builder for constructing history entries.
#[derive(Debug, Default)]
pub struct HistoryEntryBuilder {
    entry_id: Option<EntryId>,
    task_id: Option<String>,
    flow_id: Option<FlowId>,
    action: Option<String>,
    description: Option<String>,
    time: Option<DateTime<Utc>>,
}

impl HistoryEntryBuilder {
    /// Sets the entry ID. If not set, a new ID will be generated.
    pub fn entry_id(mut self, id: EntryId) -> Self {
        self.entry_id = Some(id);
        self
    }

    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn flow_id(mut self, flow_id: FlowId) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the time. If not set, the current time will be used.
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Builds the entry, failing if task id, flow id or action is missing.
    pub fn build(self) -> Result<HistoryEntry> {
        Ok(HistoryEntry {
            entry_id: self.entry_id.unwrap_or_default(),
            task_id: self.task_id.ok_or(HistoryError::MissingField("task_id"))?,
            flow_id: self.flow_id.ok_or(HistoryError::MissingField("flow_id"))?,
            action: self.action.ok_or(HistoryError::MissingField("action"))?,
            description: self.description,
            time: self.time.unwrap_or_else(Utc::now),
        })
    }
}
