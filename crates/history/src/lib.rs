//! Append-only audit trail for flow operations.
//!
//! Every FSM action that changes the network or reaches a decision writes a
//! [`HistoryEntry`] tagged with the operation's correlation id. Entries are
//! never modified after they are written.

pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::FlowId;
pub use entry::{EntryId, HistoryEntry, HistoryEntryBuilder};
pub use error::{HistoryError, Result};
pub use memory::InMemoryHistoryStore;
pub use postgres::PostgresHistoryStore;
pub use query::HistoryQuery;
pub use store::{EntryStream, HistoryStore, HistoryStoreExt};
